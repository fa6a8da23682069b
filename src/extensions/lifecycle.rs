//! Extension lifecycle manager: install/uninstall/enable/disable,
//! filesystem placement, and the live mount table that proxies HTTP requests
//! through to a running extension's backend process.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::db::DbPool;
use crate::error::{Error, Result};
use crate::extensions::manifest::ExtensionManifest;
use crate::extensions::process::{BackendProcess, ExtensionBackend};
use crate::extensions::registry::{self, NewExtension};
use crate::models::Extension;

/// One entry in the live mount table: the backend plus the prefix it
/// answers under (`/api/extensions/<name>`). `process` is a trait object so
/// tests can mount a fake backend without spawning a real child process.
pub struct Mount {
    pub process: Arc<dyn ExtensionBackend>,
}

/// Owns the filesystem layout, the DB-backed `Extension` rows (via
/// [`registry`]), and the in-process mount table of running backends.
/// One instance lives in `AppState` for the lifetime of the server.
pub struct LifecycleManager {
    pool: DbPool,
    extensions_dir: PathBuf,
    mounts: RwLock<HashMap<String, Arc<Mount>>>,
    /// Per-extension-id lock serializing install/uninstall/set-status so
    /// concurrent calls against the same extension don't race the mount
    /// table.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(pool: DbPool, extensions_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            extensions_dir: extensions_dir.into(),
            mounts: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, extension_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(extension_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Look up the mounted backend for a given extension name, if any — used
    /// by the HTTP proxy handler to forward a request (or 404 if unmounted).
    pub async fn mount_for(&self, name: &str) -> Option<Arc<Mount>> {
        self.mounts.read().await.get(name).cloned()
    }

    /// Install a packaged extension from raw ZIP bytes.
    pub async fn install(&self, zip_bytes: &[u8]) -> Result<(Extension, Option<String>)> {
        let temp_dir = tempfile::tempdir().map_err(Error::Io)?;
        extract_zip(zip_bytes, temp_dir.path())?;

        let manifest_path = temp_dir.path().join("manifest.json");
        let manifest_bytes = std::fs::read(&manifest_path)
            .map_err(|e| Error::validation("manifest", format!("manifest.json unreadable: {e}")))?;
        let manifest: ExtensionManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| Error::validation("manifest", format!("manifest.json invalid: {e}")))?;
        manifest
            .validate()
            .map_err(|msg| Error::validation("manifest", msg))?;

        let has_backend = manifest.backend_entry.is_some() && temp_dir.path().join("backend").exists();
        let has_frontend = manifest.frontend_entry.is_some() && temp_dir.path().join("frontend").exists();

        let target_dir = self.extensions_dir.join(manifest.install_dir_name());
        if target_dir.exists() {
            std::fs::remove_dir_all(&target_dir).map_err(Error::Io)?;
        }
        std::fs::create_dir_all(&self.extensions_dir).map_err(Error::Io)?;
        move_dir(temp_dir.path(), &target_dir).map_err(Error::Io)?;

        let ext = registry::upsert_extension(
            &self.pool,
            NewExtension {
                name: manifest.name.clone(),
                version: manifest.version.clone(),
                description: manifest.description.clone(),
                manifest: serde_json::to_value(&manifest).unwrap_or(Value::Null),
                install_path: target_dir.to_string_lossy().to_string(),
                has_backend,
                has_frontend,
                enabled: true,
            },
        )
        .await?;

        let guard = self.lock_for(&ext.id).await;
        let _held = guard.lock().await;

        // A previous version's backend, if mounted under the same name, must
        // be torn down before the new one loads.
        self.unload_backend_locked(&ext.name).await;

        let mut load_diagnostic = None;
        if has_backend {
            if let Some(entry) = &manifest.backend_entry {
                if let Err(e) = self.load_backend_locked(&ext, &target_dir, entry).await {
                    log::warn!("extension '{}' installed but backend load failed: {e}", ext.name);
                    load_diagnostic = Some(e.to_string());
                }
            }
        }

        log::info!("installed extension '{}' version {}", ext.name, ext.version);
        Ok((ext, load_diagnostic))
    }

    pub async fn uninstall(&self, id: &str) -> Result<Extension> {
        let ext = registry::get_by_id(&self.pool, id.to_string()).await?;
        let guard = self.lock_for(&ext.id).await;
        let _held = guard.lock().await;

        self.unload_backend_locked(&ext.name).await;

        if let Err(e) = std::fs::remove_dir_all(&ext.install_path) {
            log::warn!("failed to remove filesystem tree for '{}': {e}", ext.name);
        }

        let deleted = registry::delete(&self.pool, id.to_string()).await?;
        log::info!("uninstalled extension '{}'", deleted.name);
        Ok(deleted)
    }

    pub async fn set_status(&self, id: &str, enabled: bool) -> Result<Extension> {
        let ext = registry::get_by_id(&self.pool, id.to_string()).await?;
        let guard = self.lock_for(&ext.id).await;
        let _held = guard.lock().await;

        let updated = registry::set_status(&self.pool, id.to_string(), enabled).await?;

        if enabled {
            if updated.has_backend {
                let manifest: ExtensionManifest = serde_json::from_value(updated.manifest.clone())
                    .map_err(|e| Error::storage(format!("corrupt stored manifest: {e}")))?;
                if let Some(entry) = &manifest.backend_entry {
                    let install_path = PathBuf::from(&updated.install_path);
                    if let Err(e) = self.load_backend_locked(&updated, &install_path, entry).await {
                        log::warn!("extension '{}' enabled but backend load failed: {e}", updated.name);
                    }
                }
            }
        } else {
            self.unload_backend_locked(&updated.name).await;
        }

        log::info!(
            "extension '{}' set to {}",
            updated.name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(updated)
    }

    /// Re-mount every enabled extension with a backend. Called once at
    /// server startup so a restart doesn't require the caller to re-toggle
    /// each extension by hand.
    pub async fn restore_mounts(&self) {
        let enabled = match registry::list_enabled(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                log::error!("failed to list enabled extensions at startup: {e}");
                return;
            }
        };
        for ext in enabled {
            if !ext.has_backend {
                continue;
            }
            let manifest: ExtensionManifest = match serde_json::from_value(ext.manifest.clone()) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("skipping restore of '{}': corrupt stored manifest: {e}", ext.name);
                    continue;
                }
            };
            let Some(entry) = manifest.backend_entry.clone() else {
                continue;
            };
            let install_path = PathBuf::from(&ext.install_path);
            let guard = self.lock_for(&ext.id).await;
            let _held = guard.lock().await;
            if let Err(e) = self.load_backend_locked(&ext, &install_path, &entry).await {
                log::warn!("failed to restore backend for '{}': {e}", ext.name);
            } else {
                log::info!("restored backend mount for '{}'", ext.name);
            }
        }
    }

    async fn load_backend_locked(&self, ext: &Extension, install_path: &Path, entry: &str) -> Result<()> {
        let process = BackendProcess::spawn(&ext.name, &install_path.to_path_buf(), entry).await?;
        let mut mounts = self.mounts.write().await;
        mounts.insert(
            ext.name.clone(),
            Arc::new(Mount {
                process: Arc::new(process),
            }),
        );
        Ok(())
    }

    /// Insert a mount directly, bypassing process spawn. Test-only hook so
    /// the mount table and proxy path can be exercised against a fake
    /// [`ExtensionBackend`] instead of a real child process.
    #[cfg(test)]
    pub async fn mount_backend_for_test(&self, name: &str, backend: Arc<dyn ExtensionBackend>) {
        let mut mounts = self.mounts.write().await;
        mounts.insert(name.to_string(), Arc::new(Mount { process: backend }));
    }

    async fn unload_backend_locked(&self, name: &str) {
        let removed = {
            let mut mounts = self.mounts.write().await;
            mounts.remove(name)
        };
        if let Some(mount) = removed {
            mount.process.shutdown().await;
            log::info!("unmounted extension backend: {name}");
        }
    }
}

fn extract_zip(bytes: &[u8], dest: &Path) -> Result<()> {
    let reader = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| Error::Zip(e.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| Error::Zip(e.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::Zip(format!("unsafe path in archive entry {i}")));
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(Error::Io)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(Error::Io)?;
            }
            let mut out_file = std::fs::File::create(&out_path).map_err(Error::Io)?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(Error::Io)?;
            std::io::Write::write_all(&mut out_file, &buf).map_err(Error::Io)?;
        }
    }
    Ok(())
}

/// Move a directory tree, falling back to copy+delete across filesystems
/// (temp dirs and the extensions root may not share a mount point).
fn move_dir(src: &Path, dest: &Path) -> std::io::Result<()> {
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    copy_dir_recursive(src, dest)?;
    std::fs::remove_dir_all(src)
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dest_path = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), &dest_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::io::Write as _;

    fn build_fixture_zip(manifest: &serde_json::Value, include_backend: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            let options: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
            writer.start_file("manifest.json", options).unwrap();
            writer
                .write_all(serde_json::to_string(manifest).unwrap().as_bytes())
                .unwrap();
            if include_backend {
                writer.start_file("backend/index.js", options).unwrap();
                writer.write_all(b"// stub").unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn install_without_backend_succeeds_and_persists_row() {
        let pool = db::test_pool();
        let dir = tempfile::tempdir().unwrap();
        let mgr = LifecycleManager::new(pool.clone(), dir.path());

        let manifest = serde_json::json!({
            "name": "frontend-only",
            "version": "1.0.0",
            "frontend_entry": "index.html",
        });
        let zip_bytes = build_fixture_zip(&manifest, false);

        let (ext, diagnostic) = mgr.install(&zip_bytes).await.unwrap();
        assert_eq!(ext.name, "frontend-only");
        assert_eq!(ext.status, "enabled");
        assert!(diagnostic.is_none());
        assert!(!ext.has_backend);

        let fetched = registry::get_by_name(&pool, "frontend-only".to_string()).await.unwrap();
        assert_eq!(fetched.id, ext.id);
    }

    #[tokio::test]
    async fn install_rejects_manifest_without_entry_points() {
        let pool = db::test_pool();
        let dir = tempfile::tempdir().unwrap();
        let mgr = LifecycleManager::new(pool, dir.path());

        let manifest = serde_json::json!({"name": "bad", "version": "1.0.0"});
        let zip_bytes = build_fixture_zip(&manifest, false);

        let err = mgr.install(&zip_bytes).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn uninstall_removes_row_and_directory() {
        let pool = db::test_pool();
        let dir = tempfile::tempdir().unwrap();
        let mgr = LifecycleManager::new(pool.clone(), dir.path());

        let manifest = serde_json::json!({
            "name": "removable",
            "version": "1.0.0",
            "frontend_entry": "index.html",
        });
        let zip_bytes = build_fixture_zip(&manifest, false);
        let (ext, _) = mgr.install(&zip_bytes).await.unwrap();
        let install_path = PathBuf::from(&ext.install_path);
        assert!(install_path.exists());

        mgr.uninstall(&ext.id).await.unwrap();
        assert!(!install_path.exists());
        assert!(registry::get_by_id(&pool, ext.id).await.is_err());
    }

    #[tokio::test]
    async fn reinstall_with_collision_replaces_tree() {
        let pool = db::test_pool();
        let dir = tempfile::tempdir().unwrap();
        let mgr = LifecycleManager::new(pool, dir.path());

        let manifest = serde_json::json!({
            "name": "versioned",
            "version": "1.0.0",
            "frontend_entry": "index.html",
        });
        let zip_bytes = build_fixture_zip(&manifest, false);
        let (ext1, _) = mgr.install(&zip_bytes).await.unwrap();
        let (ext2, _) = mgr.install(&zip_bytes).await.unwrap();
        assert_eq!(ext1.id, ext2.id, "same name re-install upgrades in place");
    }

    #[tokio::test]
    async fn mounted_mock_backend_is_reachable_through_mount_for() {
        use crate::extensions::process::mock::MockBackend;
        use crate::extensions::process::BackendResponse;

        let pool = db::test_pool();
        let dir = tempfile::tempdir().unwrap();
        let mgr = LifecycleManager::new(pool, dir.path());

        assert!(mgr.mount_for("fake").await.is_none());

        let backend = Arc::new(MockBackend::new(BackendResponse {
            status: 200,
            headers: vec![],
            body: serde_json::json!({"ok": true}),
        }));
        mgr.mount_backend_for_test("fake", backend.clone()).await;

        let mount = mgr.mount_for("fake").await.expect("mock backend mounted");
        let response = mount
            .process
            .execute("GET", "/ping", &[], &Value::Null)
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(backend.calls.lock().unwrap().len(), 1);
    }
}
