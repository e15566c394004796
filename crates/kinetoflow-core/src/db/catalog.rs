//! Service and package database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::{Package, PackageItem, Service};

const SERVICE_COLUMNS: &str =
    "id, tenant_id, name, description, duration_minutes, price, category, active";

fn service_row(row: &Row<'_>) -> rusqlite::Result<Service> {
    Ok(Service {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        duration_minutes: row.get(4)?,
        price: row.get(5)?,
        category: row.get(6)?,
        active: row.get(7)?,
    })
}

fn package_row(row: &Row<'_>) -> rusqlite::Result<Package> {
    Ok(Package {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        total_price: row.get(4)?,
        active: row.get(5)?,
        items: Vec::new(),
    })
}

impl Database {
    // =========================================================================
    // Services
    // =========================================================================

    /// Insert a new service.
    pub fn insert_service(&self, service: &Service) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO services (
                id, tenant_id, name, description, duration_minutes, price, category, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                service.id,
                service.tenant_id,
                service.name,
                service.description,
                service.duration_minutes,
                service.price,
                service.category,
                service.active,
            ],
        )?;
        Ok(())
    }

    /// Update an existing service.
    pub fn update_service(&self, service: &Service) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE services SET
                name = ?2,
                description = ?3,
                duration_minutes = ?4,
                price = ?5,
                category = ?6,
                active = ?7
            WHERE id = ?1
            "#,
            params![
                service.id,
                service.name,
                service.description,
                service.duration_minutes,
                service.price,
                service.category,
                service.active,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a service by ID.
    pub fn get_service(&self, id: &str) -> DbResult<Option<Service>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM services WHERE id = ?", SERVICE_COLUMNS),
                [id],
                service_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List services of a company, ordered by name.
    pub fn list_services(&self, tenant_id: &str, active_only: bool) -> DbResult<Vec<Service>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM services WHERE tenant_id = ?1 AND (?2 = 0 OR active = 1) ORDER BY name",
            SERVICE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![tenant_id, active_only], service_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Whether another service of the company already uses `name`.
    pub fn service_name_taken(
        &self,
        tenant_id: &str,
        name: &str,
        exclude_id: Option<&str>,
    ) -> DbResult<bool> {
        let taken: bool = self.conn.query_row(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM services
                WHERE tenant_id = ?1 AND name = ?2 AND (?3 IS NULL OR id <> ?3)
            )
            "#,
            params![tenant_id, name, exclude_id],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    /// Names of active packages that include a service.
    pub fn active_packages_with_service(&self, service_id: &str) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.name FROM packages p
            JOIN package_items i ON i.package_id = p.id
            WHERE i.service_id = ?1 AND p.active = 1
            ORDER BY p.name
            "#,
        )?;
        let rows = stmt.query_map([service_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Set the active flag of a service.
    pub fn set_service_active(&self, id: &str, active: bool) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE services SET active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        Ok(rows_affected > 0)
    }

    // =========================================================================
    // Packages
    // =========================================================================

    /// Insert a new package together with its items.
    pub fn insert_package(&self, package: &Package) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO packages (id, tenant_id, name, description, total_price, active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                package.id,
                package.tenant_id,
                package.name,
                package.description,
                package.total_price,
                package.active,
            ],
        )?;
        for item in &package.items {
            self.insert_package_item(item)?;
        }
        Ok(())
    }

    /// Update the scalar columns of a package. Items are reconciled separately.
    pub fn update_package(&self, package: &Package) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE packages SET
                name = ?2,
                description = ?3,
                total_price = ?4,
                active = ?5
            WHERE id = ?1
            "#,
            params![
                package.id,
                package.name,
                package.description,
                package.total_price,
                package.active,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a package with its items.
    pub fn get_package(&self, id: &str) -> DbResult<Option<Package>> {
        let package = self
            .conn
            .query_row(
                "SELECT id, tenant_id, name, description, total_price, active FROM packages WHERE id = ?",
                [id],
                package_row,
            )
            .optional()?;

        match package {
            Some(mut package) => {
                package.items = self.list_package_items(&package.id)?;
                Ok(Some(package))
            }
            None => Ok(None),
        }
    }

    /// List packages of a company with their items, ordered by name.
    pub fn list_packages(&self, tenant_id: &str, active_only: bool) -> DbResult<Vec<Package>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, tenant_id, name, description, total_price, active FROM packages
            WHERE tenant_id = ?1 AND (?2 = 0 OR active = 1)
            ORDER BY name
            "#,
        )?;
        let mut packages = stmt
            .query_map(params![tenant_id, active_only], package_row)?
            .collect::<Result<Vec<_>, _>>()?;

        for package in &mut packages {
            package.items = self.list_package_items(&package.id)?;
        }
        Ok(packages)
    }

    /// Whether another package of the company already uses `name`.
    pub fn package_name_taken(
        &self,
        tenant_id: &str,
        name: &str,
        exclude_id: Option<&str>,
    ) -> DbResult<bool> {
        let taken: bool = self.conn.query_row(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM packages
                WHERE tenant_id = ?1 AND name = ?2 AND (?3 IS NULL OR id <> ?3)
            )
            "#,
            params![tenant_id, name, exclude_id],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    /// Names of inactive services referenced by a package.
    pub fn inactive_services_in_package(&self, package_id: &str) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT s.name FROM services s
            JOIN package_items i ON i.service_id = s.id
            WHERE i.package_id = ?1 AND s.active = 0
            ORDER BY s.name
            "#,
        )?;
        let rows = stmt.query_map([package_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Set the active flag of a package.
    pub fn set_package_active(&self, id: &str, active: bool) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE packages SET active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        Ok(rows_affected > 0)
    }

    /// Insert one package item.
    pub fn insert_package_item(&self, item: &PackageItem) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO package_items (id, package_id, service_id, quantity) VALUES (?1, ?2, ?3, ?4)",
            params![item.id, item.package_id, item.service_id, item.quantity],
        )?;
        Ok(())
    }

    /// Change the quantity of a package item.
    pub fn update_package_item_quantity(&self, id: &str, quantity: u32) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE package_items SET quantity = ?2 WHERE id = ?1",
            params![id, quantity],
        )?;
        Ok(rows_affected > 0)
    }

    /// Remove one package item.
    pub fn delete_package_item(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM package_items WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }

    /// Items of a package, in insertion order.
    pub fn list_package_items(&self, package_id: &str) -> DbResult<Vec<PackageItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, package_id, service_id, quantity FROM package_items WHERE package_id = ? ORDER BY rowid",
        )?;
        let rows = stmt.query_map([package_id], |row| {
            Ok(PackageItem {
                id: row.get(0)?,
                package_id: row.get(1)?,
                service_id: row.get(2)?,
                quantity: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
