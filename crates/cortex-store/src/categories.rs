use cortex_types::CategoryDef;
use rusqlite::params;

use crate::store::{json_list, to_json};
use crate::{Error, Result, Store};

impl Store {
    pub fn list_categories(&self) -> Result<Vec<CategoryDef>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT name, description, keywords FROM categories ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut categories = Vec::with_capacity(rows.len());
        for (name, description, keywords_raw) in rows {
            categories.push(CategoryDef {
                name,
                description,
                keywords: json_list(&keywords_raw)?,
            });
        }
        Ok(categories)
    }

    /// Insert a category definition. Conflicts on an existing name; keyword
    /// disjointness across categories is the category manager's job.
    pub fn insert_category(&self, def: &CategoryDef) -> Result<()> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO categories (name, description, keywords) VALUES (?1, ?2, ?3)",
            params![&def.name, &def.description, to_json(&def.keywords)?],
        )?;
        if inserted == 0 {
            return Err(Error::Conflict(format!("category '{}' already exists", def.name)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip_and_conflict() {
        let store = Store::open_in_memory().unwrap();
        let def = CategoryDef::new(
            "gotchas",
            "Traps and surprising behaviors",
            vec!["gotcha".to_string(), "trap".to_string()],
        );
        store.insert_category(&def).unwrap();

        let listed = store.list_categories().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], def);

        assert!(matches!(store.insert_category(&def), Err(Error::Conflict(_))));
    }
}
