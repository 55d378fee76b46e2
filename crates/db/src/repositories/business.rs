use sqlx::Row;

use instaquote_core::domain::business::{BusinessConfig, BusinessId, BusinessRule};

use super::{BusinessDirectory, RepositoryError};
use crate::DbPool;

pub struct SqlBusinessDirectory {
    pool: DbPool,
}

impl SqlBusinessDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Writes a business profile and replaces its rules. Used by seeding
    /// and tests; the serving path only reads.
    pub async fn register(&self, business: &BusinessConfig) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO businesses (id, name, industry, is_demo)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 industry = excluded.industry,
                 is_demo = excluded.is_demo",
        )
        .bind(&business.id.0)
        .bind(&business.name)
        .bind(&business.industry)
        .bind(business.is_demo)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM pricing_rules WHERE business_id = ?")
            .bind(&business.id.0)
            .execute(&mut *tx)
            .await?;

        for (position, rule) in business.rules.iter().enumerate() {
            sqlx::query(
                "INSERT INTO pricing_rules (id, business_id, position, title, description, active)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(format!("{}-rule-{}", business.id.0, position + 1))
            .bind(&business.id.0)
            .bind(position as i64)
            .bind(&rule.title)
            .bind(&rule.description)
            .bind(rule.active)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<BusinessRule, RepositoryError> {
    Ok(BusinessRule {
        title: row.try_get("title").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        description: row
            .try_get("description")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        active: row.try_get("active").map_err(|e| RepositoryError::Decode(e.to_string()))?,
    })
}

#[async_trait::async_trait]
impl BusinessDirectory for SqlBusinessDirectory {
    async fn find_business(
        &self,
        id: &BusinessId,
    ) -> Result<Option<BusinessConfig>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, industry, is_demo FROM businesses WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let rules = sqlx::query(
            "SELECT title, description, active FROM pricing_rules
             WHERE business_id = ? AND active = 1
             ORDER BY position ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(row_to_rule)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(BusinessConfig {
            id: id.clone(),
            name: row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?,
            industry: row.try_get("industry").map_err(|e| RepositoryError::Decode(e.to_string()))?,
            is_demo: row.try_get("is_demo").map_err(|e| RepositoryError::Decode(e.to_string()))?,
            rules,
        }))
    }
}

#[cfg(test)]
mod tests {
    use instaquote_core::domain::business::{BusinessConfig, BusinessId, BusinessRule};

    use super::SqlBusinessDirectory;
    use crate::repositories::BusinessDirectory;
    use crate::{connect_with_settings, migrations};

    fn rule(title: &str, active: bool) -> BusinessRule {
        BusinessRule {
            title: title.to_string(),
            description: format!("{title} guidance"),
            active,
        }
    }

    async fn setup() -> SqlBusinessDirectory {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlBusinessDirectory::new(pool)
    }

    #[tokio::test]
    async fn find_returns_only_active_rules_in_order() {
        let directory = setup().await;
        directory
            .register(&BusinessConfig {
                id: BusinessId("B1".to_string()),
                name: "Brush Bros".to_string(),
                industry: "painting".to_string(),
                is_demo: false,
                rules: vec![rule("Minimum call-out", true), rule("Old promo", false), rule("Per room", true)],
            })
            .await
            .expect("register");

        let business = directory
            .find_business(&BusinessId("B1".to_string()))
            .await
            .expect("find")
            .expect("business exists");

        let titles = business.rules.iter().map(|rule| rule.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Minimum call-out", "Per room"]);
        assert_eq!(business.industry, "painting");
        assert!(!business.is_demo);
    }

    #[tokio::test]
    async fn unknown_business_is_none() {
        let directory = setup().await;

        let missing = directory.find_business(&BusinessId("nope".to_string())).await.expect("find");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn register_replaces_existing_rules() {
        let directory = setup().await;
        let mut business = BusinessConfig {
            id: BusinessId("demo".to_string()),
            name: "Demo".to_string(),
            industry: "cleaning".to_string(),
            is_demo: true,
            rules: vec![rule("First", true)],
        };
        directory.register(&business).await.expect("register");

        business.rules = vec![rule("Second", true)];
        directory.register(&business).await.expect("re-register");

        let found = directory.find_business(&business.id).await.expect("find").expect("exists");
        assert!(found.is_demo);
        assert_eq!(found.rules, vec![rule("Second", true)]);
    }
}
