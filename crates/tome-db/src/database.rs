use std::path::Path;

use tome_codec::CodecKind;
use tome_registry::Registry;
use tome_store::{BlockStore, StoreStats};
use tome_types::{BlockId, ContentHash};
use tracing::{debug, info};

use crate::check::CheckReport;
use crate::config::DatabaseConfig;
use crate::context::DirectoryContext;
use crate::error::{DbError, DbResult};
use crate::group::Group;

/// Summary counters for a database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseStats {
    pub store: StoreStats,
    pub groups: usize,
    pub instances: usize,
    pub block_entries: usize,
    pub object_codec: CodecKind,
    pub registry_hash: ContentHash,
}

/// An open Tome database file.
///
/// The registry is held in memory and written back to block 1 by
/// [`sync`](Self::sync) and [`close`](Self::close), only when its content
/// hash differs from the one last persisted. Dropping a database without
/// closing it loses registry changes made since the last `sync`.
pub struct Database {
    store: BlockStore,
    registry: Registry,
    root: Group,
    /// Hash of the registry as last persisted. `None` when read-only.
    baseline: Option<ContentHash>,
}

impl Database {
    /// Create a new database file at `path`, replacing any existing file.
    pub fn create(path: &Path, config: DatabaseConfig) -> DbResult<Self> {
        if config.read_only {
            return Err(DbError::ReadOnly);
        }
        let mut store = BlockStore::create(path, config.store_config())?;
        let registry = Registry::with_root(config.object_codec, config.root_name.as_str());
        let root_key = registry.root_key().ok_or(tome_registry::RegistryError::NoRoot)?;

        let bytes = registry.encode()?;
        store.write_block_bytes(BlockId::REGISTRY, &bytes)?;
        store.flush_toc()?;
        let baseline = registry.content_hash()?;

        info!(path = %path.display(), codec = %config.object_codec, "created database");
        Ok(Self {
            store,
            registry,
            root: Group::new(root_key),
            baseline: Some(baseline),
        })
    }

    /// Open an existing database file.
    pub fn open(path: &Path, config: DatabaseConfig) -> DbResult<Self> {
        let store = BlockStore::open(path, config.store_config())?;
        let bytes = store.read_block_bytes(BlockId::REGISTRY)?;
        let registry = Registry::decode(&bytes)
            .map_err(|e| DbError::CorruptStore(format!("registry block unreadable: {e}")))?;
        let root_key = registry
            .root_key()
            .ok_or_else(|| DbError::CorruptStore("registry has no root group".into()))?;

        let baseline = if store.is_read_only() {
            None
        } else {
            Some(registry.content_hash()?)
        };
        if registry.object_codec() != config.object_codec {
            debug!(
                stored = %registry.object_codec(),
                requested = %config.object_codec,
                "using the object codec recorded in the database"
            );
        }

        info!(
            path = %path.display(),
            groups = registry.group_count(),
            instances = registry.instance_count(),
            read_only = store.is_read_only(),
            "opened database"
        );
        Ok(Self {
            store,
            registry,
            root: Group::new(root_key),
            baseline,
        })
    }

    /// The root group together with a context for operating on the tree.
    pub fn directory(&mut self) -> (&mut Group, DirectoryContext<'_>) {
        let ctx = DirectoryContext::new(&mut self.store, &mut self.registry);
        (&mut self.root, ctx)
    }

    pub fn context(&mut self) -> DirectoryContext<'_> {
        DirectoryContext::new(&mut self.store, &mut self.registry)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Whether the registry differs from what was last persisted.
    pub fn is_dirty(&self) -> DbResult<bool> {
        match self.baseline {
            Some(baseline) => Ok(self.registry.content_hash()? != baseline),
            None => Ok(false),
        }
    }

    /// Persist the registry if it changed, then flush the TOC.
    ///
    /// Returns whether block 1 was written. Read-only databases are never
    /// written and return `false`.
    pub fn sync(&mut self) -> DbResult<bool> {
        if self.store.is_read_only() {
            return Ok(false);
        }
        let bytes = self.registry.encode()?;
        let hash = tome_types::ContentHasher::REGISTRY.hash(&bytes);
        let written = if self.baseline == Some(hash) {
            false
        } else {
            self.store.write_block_bytes(BlockId::REGISTRY, &bytes)?;
            self.baseline = Some(hash);
            true
        };
        self.store.flush_toc()?;
        debug!(written, hash = %hash.short_hex(), "synced registry");
        Ok(written)
    }

    /// Sync unless read-only, then close the store. The store is closed even
    /// when the sync fails; the first error is returned.
    pub fn close(mut self) -> DbResult<()> {
        let synced = self.sync();
        let path = self.store.path().to_path_buf();
        let closed = self.store.close();
        synced?;
        closed?;
        info!(path = %path.display(), "closed database");
        Ok(())
    }

    pub fn stats(&self) -> DbResult<DatabaseStats> {
        Ok(DatabaseStats {
            store: self.store.stats(),
            groups: self.registry.group_count(),
            instances: self.registry.instance_count(),
            block_entries: self.registry.block_entry_count(),
            object_codec: self.registry.object_codec(),
            registry_hash: self.registry.content_hash()?,
        })
    }

    /// Cross-check the registry against the store's live blocks.
    pub fn check(&self) -> CheckReport {
        CheckReport::run(&self.store, &self.registry)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;
    use tome_types::Guid;

    use crate::instance::Instance;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Photo {
        caption: String,
        width: u32,
        height: u32,
    }

    fn photo() -> Photo {
        Photo {
            caption: "harbour at dusk".into(),
            width: 640,
            height: 480,
        }
    }

    fn db_path(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("test.tome")
    }

    fn create(dir: &TempDir) -> Database {
        Database::create(&db_path(dir), DatabaseConfig::default()).unwrap()
    }

    fn open(dir: &TempDir) -> Database {
        Database::open(&db_path(dir), DatabaseConfig::default()).unwrap()
    }

    fn open_read_only(dir: &TempDir) -> Database {
        Database::open(&db_path(dir), DatabaseConfig::read_only()).unwrap()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn create_then_open_empty() {
        let dir = tempfile::tempdir().unwrap();
        create(&dir).close().unwrap();

        let mut db = open(&dir);
        let (root, ctx) = db.directory();
        assert_eq!(root.name(&ctx).unwrap(), "root");
        let (groups, instances) = root.children(&ctx).unwrap();
        assert!(groups.is_empty());
        assert!(instances.is_empty());
    }

    #[test]
    fn create_uses_configured_root_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            root_name: "library".into(),
            ..Default::default()
        };
        let mut db = Database::create(&db_path(&dir), config).unwrap();
        let (root, ctx) = db.directory();
        assert_eq!(root.name(&ctx).unwrap(), "library");
        assert!(root.is_root(&ctx));
    }

    #[test]
    fn create_read_only_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = Database::create(&db_path(&dir), DatabaseConfig::read_only()).unwrap_err();
        assert!(matches!(err, DbError::ReadOnly));
    }

    #[test]
    fn open_with_garbage_registry_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);
        let mut store = BlockStore::create(&path, Default::default()).unwrap();
        store
            .write_block_bytes(BlockId::REGISTRY, b"not a registry")
            .unwrap();
        store.close().unwrap();

        let err = Database::open(&path, DatabaseConfig::default()).unwrap_err();
        assert!(matches!(err, DbError::CorruptStore(_)));
    }

    #[test]
    fn open_non_store_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);
        std::fs::write(&path, vec![7u8; 300]).unwrap();
        let err = Database::open(&path, DatabaseConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            DbError::Store(tome_store::StoreError::CorruptStore(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Round trip
    // -----------------------------------------------------------------------

    #[test]
    fn foo_abc_thumb_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let guid = Guid::new_random();
        let thumb: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        {
            let mut db = create(&dir);
            let (root, mut ctx) = db.directory();
            let foo = root.create_group(&mut ctx, "Foo").unwrap();
            let abc = foo.create_instance(&mut ctx, "ABC", guid).unwrap();
            abc.set_object(&mut ctx, &photo()).unwrap();
            let mut writer = abc.write_data(&mut ctx, "thumb").unwrap();
            writer.write_all(&thumb).unwrap();
            writer.finish().unwrap();
            db.close().unwrap();
        }

        let mut db = open_read_only(&dir);
        let (root, ctx) = db.directory();
        let foo = root.child_group(&ctx, "Foo").unwrap().unwrap();
        let abc = foo.child_instance(&ctx, "ABC").unwrap().unwrap();
        assert_eq!(abc.guid(&ctx).unwrap(), guid);
        assert_eq!(abc.get_object::<Photo>(&ctx).unwrap(), Some(photo()));
        assert!(abc.primary_type_name(&ctx).unwrap().ends_with("Photo"));
        assert_eq!(abc.data_names(&ctx).unwrap(), vec!["thumb".to_string()]);

        let mut bytes = Vec::new();
        abc.read_data(&ctx, "thumb")
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        assert_eq!(bytes, thumb);
        drop(ctx);
        assert!(db.check().is_clean());
    }

    #[test]
    fn children_keep_insertion_order_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let names = ["zeta", "alpha", "mid"];
        {
            let mut db = create(&dir);
            let (root, mut ctx) = db.directory();
            for name in names {
                root.create_group(&mut ctx, name).unwrap();
                root.create_instance(&mut ctx, name, Guid::nil()).unwrap();
            }
            db.close().unwrap();
        }
        let mut db = open(&dir);
        let (root, ctx) = db.directory();
        let (groups, instances) = root.children(&ctx).unwrap();
        let group_names: Vec<_> = groups.iter().map(|g| g.name(&ctx).unwrap()).collect();
        let instance_names: Vec<_> = instances.iter().map(|i| i.name(&ctx).unwrap()).collect();
        assert_eq!(group_names, names);
        assert_eq!(instance_names, names);
    }

    #[test]
    fn duplicate_sibling_names_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        root.create_instance(&mut ctx, "dup", Guid::from_u128(1))
            .unwrap();
        root.create_instance(&mut ctx, "dup", Guid::from_u128(2))
            .unwrap();
        let (_, instances) = root.children(&ctx).unwrap();
        assert_eq!(instances.len(), 2);
        let first = root.child_instance(&ctx, "dup").unwrap().unwrap();
        assert_eq!(first.guid(&ctx).unwrap(), Guid::from_u128(1));
    }

    #[test]
    fn group_flags_and_rename_persist() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut db = create(&dir);
            let (root, mut ctx) = db.directory();
            let g = root.create_group(&mut ctx, "old").unwrap();
            g.set_flags(&mut ctx, 0b1010).unwrap();
            g.rename(&mut ctx, "new").unwrap();
            db.close().unwrap();
        }
        let mut db = open(&dir);
        let (root, ctx) = db.directory();
        assert!(root.child_group(&ctx, "old").unwrap().is_none());
        let g = root.child_group(&ctx, "new").unwrap().unwrap();
        assert_eq!(g.flags(&ctx).unwrap(), 0b1010);
    }

    #[test]
    fn json_codec_is_recorded_and_used() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            object_codec: CodecKind::Json,
            ..Default::default()
        };
        {
            let mut db = Database::create(&db_path(&dir), config).unwrap();
            let (root, mut ctx) = db.directory();
            let i = root.create_instance(&mut ctx, "p", Guid::nil()).unwrap();
            i.set_object(&mut ctx, &photo()).unwrap();
            db.close().unwrap();
        }
        // Opening with the default codec still reads JSON objects.
        let mut db = open(&dir);
        assert_eq!(db.stats().unwrap().object_codec, CodecKind::Json);
        let (root, ctx) = db.directory();
        let i = root.child_instance(&ctx, "p").unwrap().unwrap();
        let raw = {
            let block = ctx.registry().instance(i.key()).unwrap().object_block().unwrap();
            let id = ctx.registry().block_entry(block).unwrap().block_id;
            ctx.store().read_block_bytes(id).unwrap()
        };
        assert!(raw.starts_with(b"{"));
        assert_eq!(i.get_object::<Photo>(&ctx).unwrap(), Some(photo()));
    }

    // -----------------------------------------------------------------------
    // Objects and data streams
    // -----------------------------------------------------------------------

    #[test]
    fn object_absent_until_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        let i = root.create_instance(&mut ctx, "i", Guid::nil()).unwrap();
        assert!(!i.has_object(&ctx).unwrap());
        assert_eq!(i.get_object::<Photo>(&ctx).unwrap(), None);
        assert_eq!(i.primary_type_name(&ctx).unwrap(), "");
    }

    #[test]
    fn set_object_reuses_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        let i = root.create_instance(&mut ctx, "i", Guid::nil()).unwrap();
        i.set_object(&mut ctx, &1u64).unwrap();
        let live = ctx.store().stats().live_blocks;
        i.set_object(&mut ctx, &"now a string".to_string()).unwrap();
        assert_eq!(ctx.store().stats().live_blocks, live);
        assert_eq!(
            i.get_object::<String>(&ctx).unwrap().as_deref(),
            Some("now a string")
        );
        assert_eq!(
            i.primary_type_name(&ctx).unwrap(),
            std::any::type_name::<String>()
        );
    }

    #[test]
    fn object_decoded_as_wrong_type_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        let i = root.create_instance(&mut ctx, "i", Guid::nil()).unwrap();
        i.set_object(&mut ctx, &7u8).unwrap();
        let err = i.get_object::<Photo>(&ctx).unwrap_err();
        assert!(matches!(err, DbError::Corrupt { ref instance, .. } if instance == "i"));
    }

    #[test]
    fn rewriting_data_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        let i = root.create_instance(&mut ctx, "i", Guid::nil()).unwrap();

        let mut w = i.write_data(&mut ctx, "log").unwrap();
        w.write_all(b"a much longer first version").unwrap();
        w.finish().unwrap();
        let mut w = i.write_data(&mut ctx, "log").unwrap();
        w.write_all(b"short").unwrap();
        w.finish().unwrap();

        let bytes = i.read_data(&ctx, "log").unwrap().read_all().unwrap();
        assert_eq!(bytes, b"short");
        assert_eq!(i.data_names(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn read_missing_data_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        let i = root.create_instance(&mut ctx, "i", Guid::nil()).unwrap();
        assert!(matches!(
            i.read_data(&ctx, "nope"),
            Err(DbError::NotFound(_))
        ));
        assert!(matches!(
            i.remove_data(&mut ctx, "nope"),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn remove_data_frees_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        let i = root.create_instance(&mut ctx, "i", Guid::nil()).unwrap();
        let mut w = i.write_data(&mut ctx, "a").unwrap();
        w.write_all(b"x").unwrap();
        w.finish().unwrap();
        let live = ctx.store().stats().live_blocks;

        i.remove_data(&mut ctx, "a").unwrap();
        assert!(!i.has_data(&ctx, "a").unwrap());
        assert_eq!(ctx.store().stats().live_blocks, live - 1);
        drop(ctx);
        assert!(db.check().is_clean());
    }

    #[test]
    fn set_name_and_guid() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        let i = root.create_instance(&mut ctx, "before", Guid::nil()).unwrap();
        i.set_name(&mut ctx, "after").unwrap();
        i.set_guid(&mut ctx, Guid::from_u128(42)).unwrap();
        assert_eq!(i.name(&ctx).unwrap(), "after");
        assert_eq!(i.guid(&ctx).unwrap(), Guid::from_u128(42));
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    #[test]
    fn removing_instance_frees_all_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        let i = root.create_instance(&mut ctx, "i", Guid::nil()).unwrap();
        i.set_object(&mut ctx, &photo()).unwrap();
        for name in ["a", "b", "c"] {
            let mut w = i.write_data(&mut ctx, name).unwrap();
            w.write_all(name.as_bytes()).unwrap();
            w.finish().unwrap();
        }
        assert_eq!(ctx.store().stats().live_blocks, 5);

        i.remove(&mut ctx).unwrap();
        assert_eq!(ctx.store().stats().live_blocks, 1);
        assert_eq!(ctx.store().free_ids().count(), 4);
        assert!(root.children(&ctx).unwrap().1.is_empty());
        drop(ctx);
        assert!(db.check().is_clean());
    }

    #[test]
    fn removing_group_removes_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        let a = root.create_group(&mut ctx, "a").unwrap();
        let b = a.create_group(&mut ctx, "b").unwrap();
        let i = b.create_instance(&mut ctx, "i", Guid::nil()).unwrap();
        i.set_object(&mut ctx, &1u32).unwrap();
        a.create_instance(&mut ctx, "j", Guid::nil())
            .unwrap()
            .set_object(&mut ctx, &2u32)
            .unwrap();

        let a = root.child_group(&ctx, "a").unwrap().unwrap();
        a.remove(&mut ctx).unwrap();

        assert!(root.children(&ctx).unwrap().0.is_empty());
        assert_eq!(ctx.registry().group_count(), 1);
        assert_eq!(ctx.registry().instance_count(), 0);
        assert_eq!(ctx.store().stats().live_blocks, 1);
        drop(ctx);
        assert!(db.check().is_clean());
    }

    #[test]
    fn root_cannot_be_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        assert!(matches!(
            root.remove(&mut ctx),
            Err(DbError::InvalidOperation(_))
        ));
    }

    #[test]
    fn stale_handle_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        let key = root
            .create_instance(&mut ctx, "gone", Guid::nil())
            .unwrap()
            .key();
        let stale = Instance::new(key);
        stale.remove(&mut ctx).unwrap();
        assert!(matches!(stale.name(&ctx), Err(DbError::NotFound(_))));
        assert!(matches!(
            stale.set_object(&mut ctx, &1u8),
            Err(DbError::NotFound(_))
        ));
        assert!(matches!(stale.remove(&mut ctx), Err(DbError::NotFound(_))));
    }

    #[test]
    fn freed_ids_are_reused_by_new_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let (root, mut ctx) = db.directory();
        let i = root.create_instance(&mut ctx, "i", Guid::nil()).unwrap();
        i.set_object(&mut ctx, &1u8).unwrap();
        let freed: Vec<_> = ctx.store().block_ids().filter(|id| !id.is_registry()).collect();
        i.remove(&mut ctx).unwrap();

        let j = root.create_instance(&mut ctx, "j", Guid::nil()).unwrap();
        j.set_object(&mut ctx, &2u8).unwrap();
        let reused: Vec<_> = ctx.store().block_ids().filter(|id| !id.is_registry()).collect();
        assert_eq!(reused, freed);
    }

    // -----------------------------------------------------------------------
    // Sync, dirty check and read-only safety
    // -----------------------------------------------------------------------

    #[test]
    fn sync_writes_registry_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        assert!(!db.sync().unwrap());

        let (root, mut ctx) = db.directory();
        root.create_group(&mut ctx, "g").unwrap();
        assert!(db.is_dirty().unwrap());
        assert!(db.sync().unwrap());
        assert!(!db.sync().unwrap());
        assert!(!db.is_dirty().unwrap());
    }

    #[test]
    fn unmodified_open_close_leaves_file_identical() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut db = create(&dir);
            let (root, mut ctx) = db.directory();
            root.create_instance(&mut ctx, "i", Guid::nil())
                .unwrap()
                .set_object(&mut ctx, &photo())
                .unwrap();
            db.close().unwrap();
        }
        let before = std::fs::read(db_path(&dir)).unwrap();
        open(&dir).close().unwrap();
        assert_eq!(std::fs::read(db_path(&dir)).unwrap(), before);
    }

    #[test]
    fn read_only_rejects_mutation_and_leaves_file_identical() {
        let dir = tempfile::tempdir().unwrap();
        create(&dir).close().unwrap();
        let before = std::fs::read(db_path(&dir)).unwrap();

        let mut db = open_read_only(&dir);
        let (root, mut ctx) = db.directory();
        assert!(ctx.is_read_only());
        assert!(matches!(
            root.create_group(&mut ctx, "g"),
            Err(DbError::ReadOnly)
        ));
        assert!(matches!(
            root.create_instance(&mut ctx, "i", Guid::nil()),
            Err(DbError::ReadOnly)
        ));
        assert!(matches!(root.rename(&mut ctx, "x"), Err(DbError::ReadOnly)));
        assert!(!db.sync().unwrap());
        db.close().unwrap();

        assert_eq!(std::fs::read(db_path(&dir)).unwrap(), before);
    }

    #[test]
    fn unsynced_registry_changes_are_lost_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut db = create(&dir);
            let (root, mut ctx) = db.directory();
            root.create_group(&mut ctx, "ephemeral").unwrap();
        }
        let mut db = open(&dir);
        let (root, ctx) = db.directory();
        assert!(root.child_group(&ctx, "ephemeral").unwrap().is_none());
    }

    fn write_stream(instance: &Instance, ctx: &mut DirectoryContext<'_>, bytes: &[u8]) -> BlockId {
        let mut w = instance.write_data(ctx, "d").unwrap();
        w.write_all(bytes).unwrap();
        w.finish().unwrap().id
    }

    /// Removes "old" and reuses its block for "new", then drops the session.
    fn reuse_block_then_drop(path: &Path, config: DatabaseConfig) {
        let mut db = Database::open(path, config).unwrap();
        let (root, mut ctx) = db.directory();
        root.child_instance(&ctx, "old")
            .unwrap()
            .unwrap()
            .remove(&mut ctx)
            .unwrap();
        let new = root.create_instance(&mut ctx, "new", Guid::nil()).unwrap();
        assert_eq!(write_stream(new, &mut ctx, b"NEW-SECRET"), BlockId::new(2));
    }

    #[test]
    fn dropped_session_does_not_leak_reused_blocks() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut db = create(&dir);
            let (root, mut ctx) = db.directory();
            let old = root.create_instance(&mut ctx, "old", Guid::nil()).unwrap();
            write_stream(old, &mut ctx, b"OLD");
            drop(ctx);
            db.close().unwrap();
        }
        reuse_block_then_drop(&db_path(&dir), DatabaseConfig::default());

        let mut db = open_read_only(&dir);
        assert!(db.check().is_clean());
        let (root, ctx) = db.directory();
        assert!(root.child_instance(&ctx, "new").unwrap().is_none());
        let old = root.child_instance(&ctx, "old").unwrap().unwrap();
        assert_eq!(old.read_data(&ctx, "d").unwrap().read_all().unwrap(), b"OLD");
    }

    #[test]
    fn durable_release_persists_registry_before_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);
        {
            let mut db = Database::create(&path, DatabaseConfig::durable()).unwrap();
            let (root, mut ctx) = db.directory();
            let old = root.create_instance(&mut ctx, "old", Guid::nil()).unwrap();
            write_stream(old, &mut ctx, b"OLD");
            drop(ctx);
            db.close().unwrap();
        }
        reuse_block_then_drop(&path, DatabaseConfig::durable());

        let mut db = open_read_only(&dir);
        let report = db.check();
        assert!(report.dangling_entries.is_empty());
        assert_eq!(report.orphaned_blocks, vec![BlockId::new(2)]);
        let (root, ctx) = db.directory();
        if let Some(old) = root.child_instance(&ctx, "old").unwrap() {
            assert!(!old.has_data(&ctx, "d").unwrap());
        }
    }

    #[test]
    fn durable_config_survives_without_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);
        let mut db = Database::create(&path, DatabaseConfig::durable()).unwrap();
        let (root, mut ctx) = db.directory();
        let i = root.create_instance(&mut ctx, "i", Guid::nil()).unwrap();
        i.set_object(&mut ctx, &photo()).unwrap();
        db.sync().unwrap();

        let mut other = Database::open(&path, DatabaseConfig::read_only()).unwrap();
        let (root, ctx) = other.directory();
        let i = root.child_instance(&ctx, "i").unwrap().unwrap();
        assert_eq!(i.get_object::<Photo>(&ctx).unwrap(), Some(photo()));
    }

    // -----------------------------------------------------------------------
    // Consistency check
    // -----------------------------------------------------------------------

    #[test]
    fn check_reports_orphaned_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        let orphan = db.store.alloc_block_id().unwrap();
        let report = db.check();
        assert_eq!(report.orphaned_blocks, vec![orphan]);
        assert!(!report.is_clean());
        assert_eq!(report.problem_count(), 1);
    }

    #[test]
    fn check_reports_dangling_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = create(&dir);
        {
            let (root, mut ctx) = db.directory();
            root.create_instance(&mut ctx, "i", Guid::nil())
                .unwrap()
                .set_object(&mut ctx, &1u8)
                .unwrap();
        }
        let id = BlockId::new(2);
        db.store.free_block_id(id).unwrap();
        let report = db.check();
        assert_eq!(report.dangling_entries.len(), 1);
        assert_eq!(report.dangling_entries[0].1, id);

        // Removing the instance still works and clears the dangling entry.
        let (root, mut ctx) = db.directory();
        let key = root.child_instance(&ctx, "i").unwrap().unwrap().key();
        Instance::new(key).remove(&mut ctx).unwrap();
        drop(ctx);
        assert!(db.check().is_clean());
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    #[derive(Debug, PartialEq)]
    struct ModelInstance {
        name: String,
        guid: Guid,
        object: Option<Vec<u8>>,
        data: Option<Vec<u8>>,
    }

    type Model = Vec<(String, Vec<ModelInstance>)>;

    /// Groups under the root, each with its instances, in insertion order.
    fn snapshot(db: &mut Database) -> Model {
        let (root, ctx) = db.directory();
        let (groups, _) = root.children(&ctx).unwrap();
        groups
            .iter_mut()
            .map(|group| {
                let name = group.name(&ctx).unwrap().to_string();
                let (_, instances) = group.children(&ctx).unwrap();
                let instances = instances
                    .iter()
                    .map(|i| ModelInstance {
                        name: i.name(&ctx).unwrap().to_string(),
                        guid: i.guid(&ctx).unwrap(),
                        object: i.get_object::<Vec<u8>>(&ctx).unwrap(),
                        data: i
                            .has_data(&ctx, "d")
                            .unwrap()
                            .then(|| i.read_data(&ctx, "d").unwrap().read_all().unwrap()),
                    })
                    .collect();
                (name, instances)
            })
            .collect()
    }

    fn op() -> impl Strategy<Value = (u8, usize, Vec<u8>)> {
        (0u8..3, 0usize..4, proptest::collection::vec(any::<u8>(), 0..32))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn reopened_tree_matches_model(ops in proptest::collection::vec(op(), 1..30)) {
            let dir = tempfile::tempdir().unwrap();
            let mut db = create(&dir);
            let mut model: Model = Vec::new();
            let mut next_guid = 1u128;
            {
                let (root, mut ctx) = db.directory();
                for (kind, slot, data) in ops {
                    let group_name = format!("g{}", slot % 2);
                    let name = format!("i{slot}");
                    let group = root.ensure_group(&mut ctx, &group_name).unwrap();
                    let index = match model.iter().position(|(n, _)| *n == group_name) {
                        Some(index) => index,
                        None => {
                            model.push((group_name.clone(), Vec::new()));
                            model.len() - 1
                        }
                    };
                    let entries = &mut model[index].1;
                    match kind {
                        0 | 1 => {
                            if group.child_instance(&ctx, &name).unwrap().is_none() {
                                let guid = Guid::from_u128(next_guid);
                                next_guid += 1;
                                group.create_instance(&mut ctx, name.as_str(), guid).unwrap();
                                entries.push(ModelInstance {
                                    name: name.clone(),
                                    guid,
                                    object: None,
                                    data: None,
                                });
                            }
                            let entry = entries.iter_mut().find(|e| e.name == name).unwrap();
                            let inst = group.child_instance(&ctx, &name).unwrap().unwrap();
                            if kind == 0 {
                                write_stream(inst, &mut ctx, &data);
                                entry.data = Some(data);
                            } else {
                                inst.set_object(&mut ctx, &data).unwrap();
                                entry.object = Some(data);
                            }
                        }
                        _ => {
                            if let Some(inst) = group.child_instance(&ctx, &name).unwrap() {
                                inst.remove(&mut ctx).unwrap();
                                entries.retain(|e| e.name != name);
                            }
                        }
                    }
                }
            }
            prop_assert!(db.check().is_clean());
            prop_assert_eq!(&snapshot(&mut db), &model);
            db.close().unwrap();

            let mut db = open_read_only(&dir);
            prop_assert!(db.check().is_clean());
            prop_assert_eq!(&snapshot(&mut db), &model);
        }
    }
}
