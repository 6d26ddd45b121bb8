//! Schema versioning and the migration registry.
//!
//! Every state snapshot and every logged operation carries the schema version
//! it was written at. The registry upgrades stale entities one version at a
//! time, so a snapshot from any supported historical version can reach
//! [`CURRENT_SCHEMA_VERSION`] without a dedicated migration per `(from, to)`
//! pair.
//!
//! The registry is static configuration: built once, validated at startup,
//! never mutated.

mod migrations;

use crate::model::{OpId, RawOperation, StateSnapshot};
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, error};

/// Oldest schema version that can still be migrated.
pub const MIN_SUPPORTED_SCHEMA_VERSION: u32 = 1;

/// Schema version this build reads and writes.
pub const CURRENT_SCHEMA_VERSION: u32 = 4;

/// Largest gap allowed between an entity's version and the next registered
/// migration. Protects against silently jumping over unreleased versions.
pub const MAX_VERSION_SKIP: u32 = 3;

pub type StateMigrationFn = fn(Value) -> std::result::Result<Value, String>;

/// Returns `Ok(None)` when the operation has no equivalent at the next
/// version, `Err` when its payload cannot be carried over.
pub type OperationMigrationFn = fn(RawOperation) -> std::result::Result<Option<RawOperation>, String>;

/// One step in the schema history.
#[derive(Debug, Clone)]
pub struct SchemaMigration {
    pub from_version: u32,
    pub to_version: u32,
    pub description: &'static str,
    pub migrate_state: StateMigrationFn,
    pub migrate_operation: OperationMigrationFn,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    #[error("Unsupported schema version {version} (this build supports {min}..={current})")]
    UnsupportedVersion { version: u32, min: u32, current: u32 },

    #[error(
        "Schema version {version} is {skip} versions behind the next migration (from {next_from}); max skip is {max_skip}"
    )]
    SkipTooLarge {
        version: u32,
        next_from: u32,
        skip: u32,
        max_skip: u32,
    },

    #[error("No migration registered at or above schema version {version}")]
    MissingMigration { version: u32 },

    #[error("Migration {from}->{to} rejected the state: {message}")]
    StateTransform { from: u32, to: u32, message: String },

    #[error("Migration {from}->{to} rejected operation {op_id}: {message}")]
    OperationTransform {
        op_id: OpId,
        from: u32,
        to: u32,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, MigrationError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Minimum supported version {min} is above current version {current}")]
    InvalidRange { min: u32, current: u32 },

    #[error("No migration from schema version {0}")]
    Gap(u32),

    #[error("More than one migration from schema version {0}")]
    Duplicate(u32),

    #[error("Migration from {from} must step to {expected}, found {to}")]
    NonUnitStep { from: u32, to: u32, expected: u32 },

    #[error("Migration from {0} lies outside the supported range")]
    OutOfRange(u32),
}

/// Ordered set of migrations over a supported version range.
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    min_supported: u32,
    current: u32,
    max_skip: u32,
    migrations: Vec<SchemaMigration>,
}

static BUILTIN: LazyLock<MigrationRegistry> = LazyLock::new(|| {
    MigrationRegistry::new(
        MIN_SUPPORTED_SCHEMA_VERSION,
        CURRENT_SCHEMA_VERSION,
        MAX_VERSION_SKIP,
        migrations::builtin_migrations(),
    )
});

/// Validate the application's registry. Call once at startup and refuse to
/// run on error: a gap would corrupt user data during migration.
pub fn validate_builtin_registry() -> std::result::Result<&'static MigrationRegistry, RegistryError> {
    let registry = MigrationRegistry::builtin();
    if let Err(e) = registry.validate() {
        error!("Built-in migration registry is broken: {}", e);
        return Err(e);
    }
    Ok(registry)
}

impl MigrationRegistry {
    /// Build a registry without validating it. See [`MigrationRegistry::validated`].
    pub fn new(
        min_supported: u32,
        current: u32,
        max_skip: u32,
        mut migrations: Vec<SchemaMigration>,
    ) -> Self {
        migrations.sort_by_key(|m| m.from_version);
        Self {
            min_supported,
            current,
            max_skip,
            migrations,
        }
    }

    pub fn validated(
        min_supported: u32,
        current: u32,
        max_skip: u32,
        migrations: Vec<SchemaMigration>,
    ) -> std::result::Result<Self, RegistryError> {
        let registry = Self::new(min_supported, current, max_skip, migrations);
        registry.validate()?;
        Ok(registry)
    }

    /// The application's registry.
    pub fn builtin() -> &'static MigrationRegistry {
        &BUILTIN
    }

    pub fn current_version(&self) -> u32 {
        self.current
    }

    pub fn min_supported_version(&self) -> u32 {
        self.min_supported
    }

    pub fn migrations(&self) -> &[SchemaMigration] {
        &self.migrations
    }

    /// Check the gapless chain: exactly one unit step from every version in
    /// `[min_supported, current)` and nothing outside it.
    pub fn validate(&self) -> std::result::Result<(), RegistryError> {
        if self.min_supported > self.current {
            return Err(RegistryError::InvalidRange {
                min: self.min_supported,
                current: self.current,
            });
        }
        for m in &self.migrations {
            if m.from_version < self.min_supported || m.from_version >= self.current {
                return Err(RegistryError::OutOfRange(m.from_version));
            }
            if m.to_version != m.from_version + 1 {
                return Err(RegistryError::NonUnitStep {
                    from: m.from_version,
                    to: m.to_version,
                    expected: m.from_version + 1,
                });
            }
        }
        for version in self.min_supported..self.current {
            match self
                .migrations
                .iter()
                .filter(|m| m.from_version == version)
                .count()
            {
                0 => return Err(RegistryError::Gap(version)),
                1 => {}
                _ => return Err(RegistryError::Duplicate(version)),
            }
        }
        Ok(())
    }

    pub fn state_needs_migration(&self, state: &StateSnapshot) -> bool {
        state.schema_version < self.current
    }

    pub fn operation_needs_migration(&self, op: &RawOperation) -> bool {
        op.schema_version < self.current
    }

    fn check_supported(&self, version: u32) -> Result<()> {
        if version < self.min_supported || version > self.current {
            return Err(MigrationError::UnsupportedVersion {
                version,
                min: self.min_supported,
                current: self.current,
            });
        }
        Ok(())
    }

    /// The migration to run for an entity at `version`.
    fn next_step(&self, version: u32) -> Result<&SchemaMigration> {
        let step = self
            .migrations
            .iter()
            .find(|m| m.from_version >= version && m.to_version > version)
            .ok_or(MigrationError::MissingMigration { version })?;
        let skip = step.from_version - version;
        if skip > self.max_skip {
            return Err(MigrationError::SkipTooLarge {
                version,
                next_from: step.from_version,
                skip,
                max_skip: self.max_skip,
            });
        }
        Ok(step)
    }

    /// Upgrade a snapshot to the current version, one step at a time.
    pub fn migrate_state(&self, mut state: StateSnapshot) -> Result<StateSnapshot> {
        self.check_supported(state.schema_version)?;
        while state.schema_version < self.current {
            let step = self.next_step(state.schema_version)?;
            debug!(
                "Migrating state {} -> {}: {}",
                state.schema_version, step.to_version, step.description
            );
            state.data = (step.migrate_state)(state.data).map_err(|message| {
                MigrationError::StateTransform {
                    from: step.from_version,
                    to: step.to_version,
                    message,
                }
            })?;
            state.schema_version = step.to_version;
        }
        Ok(state)
    }

    /// Upgrade one operation. `Ok(None)` means a step dropped it.
    pub fn migrate_operation(&self, mut op: RawOperation) -> Result<Option<RawOperation>> {
        self.check_supported(op.schema_version)?;
        while op.schema_version < self.current {
            let step = self.next_step(op.schema_version)?;
            let id = op.id.clone();
            let migrated = (step.migrate_operation)(op).map_err(|message| {
                MigrationError::OperationTransform {
                    op_id: id.clone(),
                    from: step.from_version,
                    to: step.to_version,
                    message,
                }
            })?;
            match migrated {
                Some(mut migrated) => {
                    migrated.schema_version = step.to_version;
                    op = migrated;
                }
                None => {
                    debug!(
                        "Operation {} dropped by migration {} -> {}",
                        id, step.from_version, step.to_version
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(op))
    }

    /// Upgrade a sequence of operations independently, preserving order.
    pub fn migrate_operations(&self, ops: Vec<RawOperation>) -> Result<Vec<RawOperation>> {
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            if let Some(op) = self.migrate_operation(op)? {
                out.push(op);
            }
        }
        Ok(out)
    }
}
