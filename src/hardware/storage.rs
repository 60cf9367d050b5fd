//! Free disk space detection for the filesystem that will hold a path.

use std::path::Path;
use sysinfo::Disks;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Free space (GiB) on the filesystem that contains `target`.
///
/// The target need not exist yet (the install directory is created later),
/// so the filesystem is chosen by longest mount-point prefix.
pub fn detect_disk_free_gib(target: &Path) -> f64 {
    let disks = Disks::new_with_refreshed_list();
    let mounts: Vec<(&Path, u64)> = disks
        .list()
        .iter()
        .map(|disk| (disk.mount_point(), disk.available_space()))
        .collect();

    match select_mount(target, &mounts) {
        Some(available) => available as f64 / BYTES_PER_GIB,
        None => {
            log::warn!(
                "[Hardware] [DISK] No mounted filesystem matches {}",
                target.display()
            );
            0.0
        }
    }
}

/// Pick the available bytes of the deepest mount point containing `target`.
fn select_mount(target: &Path, mounts: &[(&Path, u64)]) -> Option<u64> {
    mounts
        .iter()
        .filter(|(mount, _)| target.starts_with(mount))
        .max_by_key(|(mount, _)| mount.components().count())
        .map(|(_, available)| *available)
}
