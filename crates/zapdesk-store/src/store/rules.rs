//! Keyword monitoring rules, hits, and per-rule reports.

use super::{parse_ts, parse_uuid, sql_ts, Store};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use zapdesk_core::{
    error::ZapdeskError,
    model::{KeywordCount, Rule, RuleHit, RuleReport},
};

/// Latest hits included in a report.
const REPORT_RECENT_HITS: i64 = 20;

type RuleRow = (String, String, String, String, bool, String, String);

const RULE_COLUMNS: &str =
    "id, organization_id, name, keywords_json, active, created_by, created_at";

fn rule_from_row(row: RuleRow) -> Result<Rule, ZapdeskError> {
    let (id, org, name, keywords, active, created_by, created) = row;
    let keywords = serde_json::from_str(&keywords)
        .map_err(|e| ZapdeskError::Store(format!("bad keywords on rule {id}: {e}")))?;
    Ok(Rule {
        id: parse_uuid(&id)?,
        organization_id: parse_uuid(&org)?,
        name,
        keywords,
        active,
        created_by: parse_uuid(&created_by)?,
        created_at: parse_ts(&created)?,
    })
}

impl Store {
    pub async fn create_rule(
        &self,
        organization_id: Uuid,
        name: &str,
        keywords: &[String],
        created_by: Uuid,
    ) -> Result<Rule, ZapdeskError> {
        let id = Uuid::new_v4();
        let cleaned: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        let keywords_json = serde_json::to_string(&cleaned)?;

        sqlx::query(
            "INSERT INTO rules (id, organization_id, name, keywords_json, created_by) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .bind(name)
        .bind(&keywords_json)
        .bind(created_by.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("insert rule failed: {e}")))?;

        self.get_rule(id)
            .await?
            .ok_or_else(|| ZapdeskError::Store(format!("rule {id} vanished after insert")))
    }

    pub async fn get_rule(&self, id: Uuid) -> Result<Option<Rule>, ZapdeskError> {
        let row: Option<RuleRow> =
            sqlx::query_as(&format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        row.map(rule_from_row).transpose()
    }

    pub async fn list_rules(&self, organization_id: Uuid) -> Result<Vec<Rule>, ZapdeskError> {
        let rows: Vec<RuleRow> = sqlx::query_as(&format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE organization_id = ? ORDER BY created_at, name"
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        rows.into_iter().map(rule_from_row).collect()
    }

    pub async fn active_rules(&self, organization_id: Uuid) -> Result<Vec<Rule>, ZapdeskError> {
        let rows: Vec<RuleRow> = sqlx::query_as(&format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE organization_id = ? AND active = 1"
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        rows.into_iter().map(rule_from_row).collect()
    }

    /// Delete a rule and its hits. Returns false if it did not exist.
    pub async fn delete_rule(&self, id: Uuid) -> Result<bool, ZapdeskError> {
        sqlx::query("DELETE FROM rule_hits WHERE rule_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ZapdeskError::Store(format!("delete rule hits failed: {e}")))?;

        let result = sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ZapdeskError::Store(format!("delete rule failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn record_rule_hit(
        &self,
        rule_id: Uuid,
        chat_id: Uuid,
        message_id: Uuid,
        keyword: &str,
    ) -> Result<(), ZapdeskError> {
        sqlx::query(
            "INSERT INTO rule_hits (id, rule_id, chat_id, message_id, keyword) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(rule_id.to_string())
        .bind(chat_id.to_string())
        .bind(message_id.to_string())
        .bind(keyword)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("insert rule hit failed: {e}")))?;
        Ok(())
    }

    /// Hits since `since`: total, per keyword (most hit first), and the latest few.
    pub async fn rule_report(
        &self,
        rule_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<RuleReport, ZapdeskError> {
        let since = sql_ts(since);

        let by_keyword: Vec<(String, i64)> = sqlx::query_as(
            "SELECT keyword, COUNT(*) AS hits FROM rule_hits \
             WHERE rule_id = ? AND datetime(created_at) >= datetime(?) \
             GROUP BY keyword ORDER BY hits DESC, keyword",
        )
        .bind(rule_id.to_string())
        .bind(&since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;

        let recent: Vec<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, chat_id, message_id, keyword, created_at FROM rule_hits \
             WHERE rule_id = ? AND datetime(created_at) >= datetime(?) \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(rule_id.to_string())
        .bind(&since)
        .bind(REPORT_RECENT_HITS)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;

        let recent = recent
            .into_iter()
            .map(|(id, chat, message, keyword, created)| {
                Ok(RuleHit {
                    id: parse_uuid(&id)?,
                    rule_id,
                    chat_id: parse_uuid(&chat)?,
                    message_id: parse_uuid(&message)?,
                    keyword,
                    created_at: parse_ts(&created)?,
                })
            })
            .collect::<Result<Vec<_>, ZapdeskError>>()?;

        Ok(RuleReport {
            rule_id,
            total_hits: by_keyword.iter().map(|(_, n)| n).sum(),
            by_keyword: by_keyword
                .into_iter()
                .map(|(keyword, hits)| KeywordCount { keyword, hits })
                .collect(),
            recent,
        })
    }
}
