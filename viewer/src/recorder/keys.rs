use std::path::{Path, PathBuf};

/// Extension of every saved point-cloud file.
pub const CLOUD_EXTENSION: &str = "pcd";

/// Directory of recording session `session_id`.
/// e.g. "<root>/0001"
pub fn session_dir(root: &Path, session_id: u32) -> PathBuf {
    root.join(format!("{session_id:04}"))
}

/// File of the `frame_id`-th frame of a session.
/// e.g. "<session_dir>/0000.pcd"
pub fn session_frame_path(session_dir: &Path, frame_id: u64) -> PathBuf {
    session_dir.join(format!("{frame_id:04}.{CLOUD_EXTENSION}"))
}

/// File of a manually saved frame, named from device serial and capture stamp.
/// e.g. "<root>/RS_SIM-0001_1708300000000000.pcd"
pub fn snapshot_path(root: &Path, serial: &str, stamp_us: u64) -> PathBuf {
    root.join(format!("RS_{serial}_{stamp_us}.{CLOUD_EXTENSION}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_format() {
        let root = Path::new("/data");
        let dir = session_dir(root, 1);
        assert_eq!(dir, PathBuf::from("/data/0001"));
        assert_eq!(session_frame_path(&dir, 2), PathBuf::from("/data/0001/0002.pcd"));
        assert_eq!(
            snapshot_path(root, "231400041-03", 1708300000000000),
            PathBuf::from("/data/RS_231400041-03_1708300000000000.pcd")
        );
    }

    #[test]
    fn counters_wider_than_padding_are_not_truncated() {
        let dir = session_dir(Path::new("."), 12345);
        assert!(dir.ends_with("12345"));
        assert!(session_frame_path(&dir, 10000).ends_with("10000.pcd"));
    }
}
