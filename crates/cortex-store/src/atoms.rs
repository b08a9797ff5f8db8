use chrono::Utc;
use cortex_types::{Atom, AtomField, CausalLink, LinkType};
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use crate::store::{fts_column_expr, not_found};
use crate::{Error, Result, Store};

/// Input for creating an atom
#[derive(Debug, Clone)]
pub struct NewAtom {
    pub subject: String,
    pub action: String,
    pub outcome: String,
    pub consequences: String,
    pub confidence: f64,
    pub source: String,
}

fn atom_from_row(row: &Row) -> rusqlite::Result<Atom> {
    Ok(Atom {
        id: row.get(0)?,
        subject: row.get(1)?,
        action: row.get(2)?,
        outcome: row.get(3)?,
        consequences: row.get(4)?,
        confidence: row.get(5)?,
        validation_count: row.get::<_, i64>(6)? as u32,
        source: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const ATOM_COLUMNS: &str =
    "id, subject, action, outcome, consequences, confidence, validation_count, source, created_at";

/// Aggregate counts for the causal graph
#[derive(Debug, Clone)]
pub struct AtomStats {
    pub atom_count: usize,
    pub link_count: usize,
    pub validated_count: usize,
}

impl Store {
    pub fn create_atom(&self, new: NewAtom) -> Result<Atom> {
        for (facet, value) in [
            ("subject", &new.subject),
            ("action", &new.action),
            ("outcome", &new.outcome),
            ("consequences", &new.consequences),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("atom facet '{}' is empty", facet)));
            }
        }
        if !(0.0..=1.0).contains(&new.confidence) {
            return Err(Error::Validation(format!(
                "atom confidence {} outside [0, 1]",
                new.confidence
            )));
        }

        let atom = Atom {
            id: Uuid::new_v4().to_string(),
            subject: new.subject,
            action: new.action,
            outcome: new.outcome,
            consequences: new.consequences,
            confidence: new.confidence,
            validation_count: 0,
            source: new.source,
            created_at: Utc::now(),
        };

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO atoms (id, subject, action, outcome, consequences, confidence,
                validation_count, source, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)
            "#,
            params![
                &atom.id,
                &atom.subject,
                &atom.action,
                &atom.outcome,
                &atom.consequences,
                atom.confidence,
                &atom.source,
                atom.created_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO atoms_fts (subject, action, outcome, consequences, atom_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&atom.subject, &atom.action, &atom.outcome, &atom.consequences, &atom.id],
        )?;
        tx.commit()?;

        Ok(atom)
    }

    pub fn get_atom(&self, id: &str) -> Result<Atom> {
        let atom = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM atoms WHERE id = ?1", ATOM_COLUMNS),
                [id],
                atom_from_row,
            )
            .optional()?;
        match atom {
            Some(atom) => Ok(atom),
            None => not_found("atom", id),
        }
    }

    pub fn search_atoms_by_field(
        &self,
        field: AtomField,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Atom>> {
        let Some(expr) = fts_column_expr(field.as_str(), query) else {
            return Ok(Vec::new());
        };
        let columns = ATOM_COLUMNS
            .split(", ")
            .map(|c| format!("a.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn().prepare(&format!(
            r#"
            SELECT {} FROM atoms a
            JOIN (
                SELECT atom_id, rank FROM atoms_fts
                WHERE atoms_fts MATCH ?1
                ORDER BY rank
                LIMIT ?2
            ) f ON a.id = f.atom_id
            ORDER BY f.rank
            "#,
            columns
        ))?;
        let atoms = stmt
            .query_map(params![expr, limit as i64], atom_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(atoms)
    }

    pub fn create_link(&self, link: &CausalLink) -> Result<()> {
        if link.from_atom_id == link.to_atom_id {
            return Err(Error::Validation("causal link cannot be self-referential".to_string()));
        }
        if !(0.0..=1.0).contains(&link.strength) {
            return Err(Error::Validation(format!(
                "link strength {} outside [0, 1]",
                link.strength
            )));
        }
        self.get_atom(&link.from_atom_id)?;
        self.get_atom(&link.to_atom_id)?;

        let inserted = self.conn().execute(
            r#"
            INSERT OR IGNORE INTO causal_links (from_atom_id, to_atom_id, link_type, strength)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                &link.from_atom_id,
                &link.to_atom_id,
                link.link_type.as_str(),
                link.strength
            ],
        )?;
        if inserted == 0 {
            return Err(Error::Conflict(format!(
                "link {} -> {} ({}) already exists",
                link.from_atom_id,
                link.to_atom_id,
                link.link_type.as_str()
            )));
        }
        Ok(())
    }

    /// Edges pointing into `atom_id` (its potential causes)
    pub fn links_into(&self, atom_id: &str) -> Result<Vec<CausalLink>> {
        self.query_links("to_atom_id", atom_id)
    }

    /// Edges leaving `atom_id` (its potential effects)
    pub fn links_from(&self, atom_id: &str) -> Result<Vec<CausalLink>> {
        self.query_links("from_atom_id", atom_id)
    }

    fn query_links(&self, column: &str, atom_id: &str) -> Result<Vec<CausalLink>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT from_atom_id, to_atom_id, link_type, strength FROM causal_links WHERE {} = ?1",
            column
        ))?;
        let links = stmt
            .query_map([atom_id], |row| {
                let link_type_raw: String = row.get(2)?;
                Ok(CausalLink {
                    from_atom_id: row.get(0)?,
                    to_atom_id: row.get(1)?,
                    link_type: LinkType::parse(&link_type_raw).unwrap_or(LinkType::Correlates),
                    strength: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    /// Walk the cause edges backwards from an atom, depth-bounded. Returns
    /// (depth, atom) pairs, nearest causes first.
    pub fn find_causes(&self, atom_id: &str, max_depth: usize) -> Result<Vec<(usize, Atom)>> {
        let mut seen = std::collections::HashSet::new();
        let mut frontier = vec![atom_id.to_string()];
        let mut causes = Vec::new();
        seen.insert(atom_id.to_string());

        for depth in 1..=max_depth {
            let mut next = Vec::new();
            for id in &frontier {
                for link in self.links_into(id)? {
                    if seen.insert(link.from_atom_id.clone()) {
                        causes.push((depth, self.get_atom(&link.from_atom_id)?));
                        next.push(link.from_atom_id);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(causes)
    }

    pub fn record_atom_validation(&self, id: &str) -> Result<Atom> {
        let updated = self.conn().execute(
            "UPDATE atoms SET validation_count = validation_count + 1, confidence = MIN(1.0, confidence + 0.1) WHERE id = ?1",
            [id],
        )?;
        if updated == 0 {
            return not_found("atom", id);
        }
        self.get_atom(id)
    }

    pub fn atom_stats(&self) -> Result<AtomStats> {
        let atom_count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM atoms", [], |row| row.get(0))?;
        let link_count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM causal_links", [], |row| row.get(0))?;
        let validated_count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM atoms WHERE validation_count > 0",
            [],
            |row| row.get(0),
        )?;
        Ok(AtomStats {
            atom_count: atom_count as usize,
            link_count: link_count as usize,
            validated_count: validated_count as usize,
        })
    }

    pub fn recent_atoms(&self, limit: usize) -> Result<Vec<Atom>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM atoms ORDER BY created_at DESC LIMIT ?1",
            ATOM_COLUMNS
        ))?;
        let atoms = stmt
            .query_map([limit as i64], atom_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(atoms)
    }

    /// Dump all link rows (small graphs; used by traversal-heavy callers)
    pub fn all_links(&self) -> Result<Vec<CausalLink>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT from_atom_id, to_atom_id, link_type, strength FROM causal_links")?;
        let links = stmt
            .query_map([], |row| {
                let link_type_raw: String = row.get(2)?;
                Ok(CausalLink {
                    from_atom_id: row.get(0)?,
                    to_atom_id: row.get(1)?,
                    link_type: LinkType::parse(&link_type_raw).unwrap_or(LinkType::Correlates),
                    strength: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(subject: &str, outcome: &str) -> NewAtom {
        NewAtom {
            subject: subject.to_string(),
            action: "restarted".to_string(),
            outcome: outcome.to_string(),
            consequences: "brief downtime".to_string(),
            confidence: 0.8,
            source: "agent".to_string(),
        }
    }

    #[test]
    fn test_create_atom_rejects_empty_facet() {
        let store = Store::open_in_memory().unwrap();
        let mut bad = atom("executor", "recovered");
        bad.action = "  ".to_string();
        assert!(matches!(store.create_atom(bad), Err(Error::Validation(_))));
    }

    #[test]
    fn test_search_by_field() {
        let store = Store::open_in_memory().unwrap();
        store.create_atom(atom("gateway", "connection refused")).unwrap();
        store.create_atom(atom("executor", "recovered cleanly")).unwrap();

        let hits = store
            .search_atoms_by_field(AtomField::Outcome, "refused", 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].subject, "gateway");

        let none = store
            .search_atoms_by_field(AtomField::Subject, "refused", 10)
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_link_rejects_self_reference() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_atom(atom("gateway", "down")).unwrap();
        let link = CausalLink {
            from_atom_id: a.id.clone(),
            to_atom_id: a.id.clone(),
            link_type: LinkType::Causes,
            strength: 0.9,
        };
        assert!(matches!(store.create_link(&link), Err(Error::Validation(_))));
    }

    #[test]
    fn test_find_causes_depth_bounded() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_atom(atom("disk full", "writes fail")).unwrap();
        let b = store.create_atom(atom("writes fail", "queue backs up")).unwrap();
        let c = store.create_atom(atom("queue backs up", "pipeline stuck")).unwrap();

        for (from, to) in [(&a, &b), (&b, &c)] {
            store
                .create_link(&CausalLink {
                    from_atom_id: from.id.clone(),
                    to_atom_id: to.id.clone(),
                    link_type: LinkType::Causes,
                    strength: 0.9,
                })
                .unwrap();
        }

        let causes = store.find_causes(&c.id, 1).unwrap();
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0].1.id, b.id);

        let causes = store.find_causes(&c.id, 5).unwrap();
        assert_eq!(causes.len(), 2);
        assert_eq!(causes[1].1.id, a.id);
    }

    #[test]
    fn test_duplicate_link_conflicts() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_atom(atom("one", "two")).unwrap();
        let b = store.create_atom(atom("three", "four")).unwrap();
        let link = CausalLink {
            from_atom_id: a.id.clone(),
            to_atom_id: b.id.clone(),
            link_type: LinkType::Enables,
            strength: 0.5,
        };
        store.create_link(&link).unwrap();
        assert!(matches!(store.create_link(&link), Err(Error::Conflict(_))));
    }
}
