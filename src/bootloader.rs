//! Bootloader writer: the grub.d fragment listing bootable deployments.
//!
//! The fragment is a shell script whose content after the first two lines is
//! copied verbatim into the effective grub configuration by `update-grub`
//! running inside the chroot. This module only emits the fragment.

use std::fmt::{self, Display};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};

use crate::metadata::{DeploymentMeta, STATUS_BOOTED, STATUS_READY};

/// Location of the fragment inside a deployment tree.
pub const FRAGMENT_RELPATH: &str = "etc/grub.d/25_hammer_entries";

/// The menu never lists more than this many deployments.
pub const MAX_ENTRIES: usize = 5;

/// One bootable deployment, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    pub name: String,
    pub kernel: String,
}

/// Pick the deployments the menu should list: `ready` or `booted`, newest
/// first by `created`, capped, and silently skipping records without a
/// kernel.
pub fn select_entries(deployments: &[(String, DeploymentMeta)]) -> Vec<BootEntry> {
    let mut candidates: Vec<&(String, DeploymentMeta)> = deployments
        .iter()
        .filter(|(_, meta)| meta.status == STATUS_READY || meta.status == STATUS_BOOTED)
        .filter(|(_, meta)| !meta.kernel.is_empty())
        .collect();
    candidates.sort_by(|a, b| b.1.created.cmp(&a.1.created));

    candidates
        .into_iter()
        .take(MAX_ENTRIES)
        .map(|(name, meta)| BootEntry {
            name: name.clone(),
            kernel: meta.kernel.clone(),
        })
        .collect()
}

struct MenuEntry<'a> {
    entry: &'a BootEntry,
    uuid: &'a str,
}

impl Display for MenuEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.entry.name;
        let kernel = &self.entry.kernel;
        let uuid = self.uuid;
        writeln!(f, "menuentry 'HammerOS ({name})' {{")?;
        writeln!(f, "  insmod gzio; insmod part_gpt; insmod btrfs")?;
        writeln!(f, "  search --no-floppy --fs-uuid --set=root {uuid}")?;
        writeln!(
            f,
            "  linux /deployments/{name}/boot/vmlinuz-{kernel} root=UUID={uuid} rw \
             rootflags=subvol=deployments/{name} quiet splash $vt_handoff"
        )?;
        writeln!(f, "  initrd /deployments/{name}/boot/initrd.img-{kernel}")?;
        writeln!(f, "}}")
    }
}

/// The full fragment text for the given entries.
pub fn render_fragment(entries: &[BootEntry], uuid: &str) -> String {
    let mut out = String::from("#!/bin/sh\nexec tail -n +3 $0\n");
    for entry in entries {
        out.push_str(&MenuEntry { entry, uuid }.to_string());
    }
    out
}

/// Write the fragment into a staged deployment, mode 0755.
pub fn write_fragment(staged: &Path, entries: &[BootEntry], uuid: &str) -> Result<()> {
    let path = staged.join(FRAGMENT_RELPATH);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    fs::write(&path, render_fragment(entries, uuid))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    let mut perms = fs::metadata(&path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms)
        .with_context(|| format!("Failed to chmod {}", path.display()))?;

    tracing::info!(
        fragment = %path.display(),
        entries = entries.len(),
        "bootloader fragment written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{STATUS_BROKEN, STATUS_PREVIOUS};

    fn meta(created: &str, status: &str, kernel: &str) -> DeploymentMeta {
        let mut m = DeploymentMeta::new("deploy", "hammer-p", kernel, "v", status);
        m.created = created.to_string();
        m
    }

    #[test]
    fn selects_only_ready_and_booted() {
        let deployments = vec![
            ("hammer-1".into(), meta("2025-01-01T00:00:00Z", STATUS_BOOTED, "6.1")),
            ("hammer-2".into(), meta("2025-01-02T00:00:00Z", STATUS_BROKEN, "6.1")),
            ("hammer-3".into(), meta("2025-01-03T00:00:00Z", STATUS_PREVIOUS, "6.1")),
            ("hammer-4".into(), meta("2025-01-04T00:00:00Z", STATUS_READY, "6.2")),
        ];

        let entries = select_entries(&deployments);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["hammer-4", "hammer-1"]);
    }

    #[test]
    fn orders_newest_first_and_caps_at_five() {
        let deployments: Vec<(String, DeploymentMeta)> = (1..=7)
            .map(|i| {
                (
                    format!("hammer-{i}"),
                    meta(&format!("2025-01-0{i}T00:00:00Z"), STATUS_READY, "6.1"),
                )
            })
            .collect();

        let entries = select_entries(&deployments);
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert_eq!(entries[0].name, "hammer-7");
        assert_eq!(entries[4].name, "hammer-3");
    }

    #[test]
    fn skips_deployments_without_kernel() {
        let deployments = vec![
            ("hammer-1".into(), meta("2025-01-01T00:00:00Z", STATUS_READY, "")),
            ("hammer-2".into(), meta("2025-01-02T00:00:00Z", STATUS_READY, "6.1")),
        ];

        let entries = select_entries(&deployments);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "hammer-2");
    }

    #[test]
    fn fragment_text_has_header_and_menuentry() {
        let entries = vec![BootEntry {
            name: "hammer-20250101000000".into(),
            kernel: "6.1.0-18-amd64".into(),
        }];
        let text = render_fragment(&entries, "d1b1a970-2a1e-4d28-8dbb-3a0a3f1f4e21");

        assert!(text.starts_with("#!/bin/sh\nexec tail -n +3 $0\n"));
        assert!(text.contains("menuentry 'HammerOS (hammer-20250101000000)'"));
        assert!(text.contains(
            "search --no-floppy --fs-uuid --set=root d1b1a970-2a1e-4d28-8dbb-3a0a3f1f4e21"
        ));
        assert!(text.contains(
            "linux /deployments/hammer-20250101000000/boot/vmlinuz-6.1.0-18-amd64"
        ));
        assert!(text.contains("rootflags=subvol=deployments/hammer-20250101000000"));
        assert!(text.contains(
            "initrd /deployments/hammer-20250101000000/boot/initrd.img-6.1.0-18-amd64"
        ));
    }

    #[test]
    fn empty_candidate_set_renders_header_only() {
        let text = render_fragment(&[], "uuid");
        assert_eq!(text, "#!/bin/sh\nexec tail -n +3 $0\n");
    }

    #[test]
    fn write_fragment_sets_executable_mode() {
        let dir = tempfile::TempDir::new().unwrap();
        write_fragment(dir.path(), &[], "uuid").unwrap();

        let path = dir.path().join(FRAGMENT_RELPATH);
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
