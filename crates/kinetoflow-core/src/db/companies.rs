//! Company database operations.

use rusqlite::{params, OptionalExtension};

use super::{parse_timestamp, timestamp, Database, DbResult};
use crate::models::Company;

impl Database {
    /// Insert a new company.
    pub fn insert_company(&self, company: &Company) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO companies (id, name, address, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                company.id,
                company.name,
                company.address,
                timestamp(&company.created_at),
            ],
        )?;
        Ok(())
    }

    /// Get a company by ID.
    pub fn get_company(&self, id: &str) -> DbResult<Option<Company>> {
        self.query_company("SELECT id, name, address, created_at FROM companies WHERE id = ?", id)
    }

    /// Get a company by exact name.
    pub fn get_company_by_name(&self, name: &str) -> DbResult<Option<Company>> {
        self.query_company(
            "SELECT id, name, address, created_at FROM companies WHERE name = ?",
            name,
        )
    }

    /// List all companies, ordered by name.
    pub fn list_companies(&self) -> DbResult<Vec<Company>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, address, created_at FROM companies ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut companies = Vec::new();
        for row in rows {
            let (id, name, address, created_at) = row?;
            companies.push(Company {
                id,
                name,
                address,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(companies)
    }

    /// Update the address of a company.
    pub fn update_company_address(&self, id: &str, address: Option<&str>) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE companies SET address = ?2 WHERE id = ?1",
            params![id, address],
        )?;
        Ok(rows_affected > 0)
    }

    fn query_company(&self, sql: &str, key: &str) -> DbResult<Option<Company>> {
        let row = self
            .conn
            .query_row(sql, [key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()?;

        match row {
            Some((id, name, address, created_at)) => Ok(Some(Company {
                id,
                name,
                address,
                created_at: parse_timestamp(&created_at)?,
            })),
            None => Ok(None),
        }
    }
}
