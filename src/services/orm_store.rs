use crate::entities::{attachments, prelude::*};
use crate::error::{BridgeError, Result};
use crate::models::UploadedFile;
use crate::services::records::{Persistable, Record, RecordResolver, still_attached};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Record store backed by the `attachments` table. A record exists once it
/// has at least one stored attribute.
#[derive(Debug, Clone)]
pub struct OrmStore {
    db: DatabaseConnection,
    record_type: String,
}

/// Checks applied to attachment attributes when a save asks for validation.
#[derive(Debug, Validate)]
struct AttachmentRow {
    #[validate(length(min = 1, max = 255, message = "Record id must be between 1 and 255 characters"))]
    record_id: String,
    #[validate(length(min = 1, max = 255, message = "Attribute name must be between 1 and 255 characters"))]
    attribute: String,
    #[validate(custom(function = "validate_uploaded_file"))]
    data: String,
}

fn validate_uploaded_file(data: &str) -> std::result::Result<(), ValidationError> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|_| ValidationError::new("invalid_json"))?;
    match value.get("id").and_then(|id| id.as_str()) {
        Some(id) if !id.is_empty() => Ok(()),
        _ => Err(ValidationError::new("missing_file_id")),
    }
}

impl OrmStore {
    pub fn new(db: DatabaseConnection, record_type: impl Into<String>) -> Self {
        Self {
            db,
            record_type: record_type.into(),
        }
    }

    /// Store a single attribute outside of any record save.
    pub async fn insert(&self, id: &str, attribute: &str, data: Option<String>) -> Result<()> {
        self.upsert(&self.db, id, attribute, data).await
    }

    async fn rows<C: ConnectionTrait>(&self, conn: &C, id: &str) -> Result<Vec<attachments::Model>> {
        Ok(Attachments::find()
            .filter(attachments::Column::RecordType.eq(self.record_type.as_str()))
            .filter(attachments::Column::RecordId.eq(id))
            .all(conn)
            .await?)
    }

    fn to_record(&self, id: &str, rows: Vec<attachments::Model>) -> Option<Record> {
        if rows.is_empty() {
            return None;
        }

        let mut record = Record::new(self.record_type.clone(), id);
        for row in rows {
            record.set_attribute(&row.attribute, row.data);
        }
        Some(record)
    }

    /// Insert or update one attribute row. Relies on the unique
    /// `(record_type, record_id, attribute)` index.
    async fn upsert<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        attribute: &str,
        data: Option<String>,
    ) -> Result<()> {
        let row = attachments::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            record_type: Set(self.record_type.clone()),
            record_id: Set(id.to_string()),
            attribute: Set(attribute.to_string()),
            data: Set(data),
            updated_at: Set(Utc::now()),
        };

        Attachments::insert(row)
            .on_conflict(
                OnConflict::columns([
                    attachments::Column::RecordType,
                    attachments::Column::RecordId,
                    attachments::Column::Attribute,
                ])
                .update_columns([attachments::Column::Data, attachments::Column::UpdatedAt])
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }

    fn validate(record: &Record) -> Result<()> {
        for (attribute, data) in &record.attributes {
            let Some(data) = data else { continue };
            if !attribute.ends_with("_data") {
                continue;
            }
            AttachmentRow {
                record_id: record.id.clone(),
                attribute: attribute.clone(),
                data: data.clone(),
            }
            .validate()?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordResolver for OrmStore {
    async fn resolve(&self, id: &str) -> Result<Option<Record>> {
        let rows = self.rows(&self.db, id).await?;
        Ok(self.to_record(id, rows))
    }
}

#[async_trait]
impl Persistable for OrmStore {
    async fn save(&self, record: &Record, validate: bool) -> Result<()> {
        if validate {
            Self::validate(record)?;
        }

        let txn = self.db.begin().await?;
        for (attribute, data) in &record.attributes {
            self.upsert(&txn, &record.id, attribute, data.clone())
                .await?;
        }
        txn.commit().await?;

        tracing::debug!(
            "💾 Saved {} {} ({} attributes)",
            self.record_type,
            record.id,
            record.attributes.len()
        );
        Ok(())
    }

    async fn swap_attachment(
        &self,
        id: &str,
        attribute: &str,
        expected: &UploadedFile,
        data: &str,
    ) -> Result<Record> {
        let txn = self.db.begin().await?;
        let rows = self.rows(&txn, id).await?;
        if rows.is_empty() {
            return Err(BridgeError::RecordNotFound {
                record_type: self.record_type.clone(),
                id: id.to_string(),
            });
        }

        let stored = match rows
            .iter()
            .find(|row| row.attribute == attribute)
            .and_then(|row| row.data.clone())
        {
            Some(current) if still_attached(Some(&current), expected)? => current,
            _ => return Err(BridgeError::AttachmentChanged),
        };

        // Compare-and-swap on the value read above; a concurrent writer
        // leaves zero rows affected.
        let updated = Attachments::update_many()
            .col_expr(attachments::Column::Data, Expr::value(data.to_string()))
            .col_expr(attachments::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(attachments::Column::RecordType.eq(self.record_type.as_str()))
            .filter(attachments::Column::RecordId.eq(id))
            .filter(attachments::Column::Attribute.eq(attribute))
            .filter(attachments::Column::Data.eq(stored.as_str()))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(BridgeError::AttachmentChanged);
        }

        let rows = self.rows(&txn, id).await?;
        txn.commit().await?;

        tracing::debug!("💾 Swapped {} on {} {}", attribute, self.record_type, id);
        self.to_record(id, rows)
            .ok_or_else(|| BridgeError::RecordNotFound {
                record_type: self.record_type.clone(),
                id: id.to_string(),
            })
    }
}
