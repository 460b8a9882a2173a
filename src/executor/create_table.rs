use tracing::debug;

use crate::{
    planner::logical_plan::{AlterTableAction, AlterTablePlan, CreateTablePlan, DropTablePlan},
    storage::{schema::SchemaManager, storage_manager::StorageManager},
    types::error::DatabaseError,
};

/// Runs the DDL statements against the catalog.
///
/// `DROP` and `ALTER` bump the structural version of the table in the
/// shared lock table, which invalidates statements of other handles that
/// read it.
pub struct SchemaExecutor<'a> {
    storage: &'a mut StorageManager,
    schemas: &'a mut SchemaManager,
}

impl<'a> SchemaExecutor<'a> {
    pub fn new(storage: &'a mut StorageManager, schemas: &'a mut SchemaManager) -> Self {
        Self { storage, schemas }
    }

    /// Returns `false` when `IF NOT EXISTS` skipped an existing table.
    pub fn create_table(&mut self, plan: &CreateTablePlan) -> Result<bool, DatabaseError> {
        if plan.if_not_exists && self.schemas.table_exists(&plan.table_name) {
            debug!(table = %plan.table_name, "table exists, create skipped");
            return Ok(false);
        }
        self.schemas.define_table(
            self.storage,
            &plan.table_name,
            plan.columns.clone(),
            &plan.sql,
        )?;
        Ok(true)
    }

    /// Returns `false` when `IF EXISTS` skipped a missing table.
    pub fn drop_table(&mut self, plan: &DropTablePlan) -> Result<bool, DatabaseError> {
        if plan.if_exists && !self.schemas.table_exists(&plan.table_name) {
            return Ok(false);
        }
        let dropped = self.schemas.drop_table(self.storage, &plan.table_name)?;
        self.storage
            .shared()
            .bump_table_version(&dropped.table_name.to_ascii_lowercase());
        Ok(true)
    }

    pub fn alter_table(&mut self, plan: &AlterTablePlan) -> Result<(), DatabaseError> {
        let old_name = plan.table_name.to_ascii_lowercase();
        match &plan.action {
            AlterTableAction::AddColumn(column) => {
                self.schemas
                    .add_column(self.storage, &plan.table_name, column.clone())?;
            }
            AlterTableAction::RenameTo(new_name) => {
                self.schemas
                    .rename_table(self.storage, &plan.table_name, new_name)?;
                self.storage
                    .shared()
                    .bump_table_version(&new_name.to_ascii_lowercase());
            }
        }
        self.storage.shared().bump_table_version(&old_name);
        Ok(())
    }
}
