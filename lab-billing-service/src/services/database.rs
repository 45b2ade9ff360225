//! Database service for lab-billing-service.

use crate::error::BillingError;
use crate::models::{
    Customer, CustomerType, Invoice, InvoiceLineItem, InvoiceStatus, InvoiceTaxLine,
    ListInvoicesFilter, NewInvoice, NewReminder, NewTransaction, Patient, PaymentReminder,
    ReminderStatus, RequestedAnalysis, ServiceRequest, Transaction,
};
use crate::services::directory::{CustomerDirectory, RequestSource};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::numbering::{sequence_year, DocumentKind};
use crate::services::store::BillingStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = r#"
    invoice_id, invoice_number, invoice_type, status, customer_id, customer_name,
    customer_address, customer_tax_id, patient_id, patient_name, request_id,
    subtotal, discount_percent, discount_amount, tax_amount, stamp_tax_amount,
    total_amount, paid_amount, balance_amount, currency, exchange_rate,
    issue_date, due_date, paid_date, recurrence_type, recurrence_end,
    last_generated_at, parent_invoice_id, successor_invoice_id, notes, created_by,
    version, created_utc, updated_utc
"#;

const TRANSACTION_COLUMNS: &str = r#"
    transaction_id, transaction_number, transaction_type, status, amount,
    payment_method, payment_reference, invoice_id, customer_id, description,
    notes, processed_by, created_utc
"#;

const REMINDER_COLUMNS: &str = r#"
    reminder_id, invoice_id, reminder_level, due_date, amount, method, status,
    sent_by, created_utc
"#;

const CUSTOMER_COLUMNS: &str = r#"
    customer_id, customer_type, name, address, tax_id, email, phone, payment_terms_days
"#;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "lab-billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Postgres>, BillingError> {
        self.pool.begin().await.map_err(|e| {
            BillingError::Storage(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }
}

async fn commit(tx: sqlx::Transaction<'_, sqlx::Postgres>) -> Result<(), BillingError> {
    tx.commit().await.map_err(|e| {
        BillingError::Storage(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })
}

/// Insert an invoice with its lines inside the caller's transaction.
async fn insert_invoice(
    conn: &mut PgConnection,
    new: &NewInvoice,
) -> Result<Invoice, BillingError> {
    let invoice_id = Uuid::new_v4();

    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        r#"
        INSERT INTO invoices (
            invoice_id, invoice_number, invoice_type, status, customer_id, customer_name,
            customer_address, customer_tax_id, patient_id, patient_name, request_id,
            subtotal, discount_percent, discount_amount, tax_amount, stamp_tax_amount,
            total_amount, paid_amount, balance_amount, currency, exchange_rate,
            issue_date, due_date, recurrence_type, recurrence_end, last_generated_at,
            parent_invoice_id, notes, created_by, version, created_utc, updated_utc
        )
        VALUES (
            $1, next_document_number($2, $3), $4, $5, $6, $7, $8, $9, $10, $11, $12,
            $13, $14, $15, $16, $17, $18, 0, $18, $19, $20, $21, $22, $23, $24, $25,
            $26, $27, $28, 1, $21, $21
        )
        RETURNING {INVOICE_COLUMNS}
        "#
    ))
    .bind(invoice_id)
    .bind(DocumentKind::Invoice.prefix())
    .bind(sequence_year(new.issue_date))
    .bind(new.invoice_type.as_str())
    .bind(new.status.as_str())
    .bind(new.customer_id)
    .bind(&new.customer_name)
    .bind(&new.customer_address)
    .bind(&new.customer_tax_id)
    .bind(new.patient_id)
    .bind(&new.patient_name)
    .bind(new.request_id)
    .bind(new.subtotal)
    .bind(new.discount_percent)
    .bind(new.discount_amount)
    .bind(new.tax_amount)
    .bind(new.stamp_tax_amount)
    .bind(new.total_amount)
    .bind(&new.currency)
    .bind(new.exchange_rate)
    .bind(new.issue_date)
    .bind(new.due_date)
    .bind(new.recurrence_type.as_str())
    .bind(new.recurrence_end)
    .bind(new.last_generated_at)
    .bind(new.parent_invoice_id)
    .bind(&new.notes)
    .bind(&new.created_by)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            BillingError::Conflict(format!(
                "Request {} is already invoiced",
                new.request_id.map(|id| id.to_string()).unwrap_or_default()
            ))
        }
        _ => BillingError::Storage(anyhow::anyhow!("Failed to create invoice: {}", e)),
    })?;

    for (i, item) in new.items.iter().enumerate() {
        let line = item.into_line_item(invoice_id, i as i32);
        sqlx::query(
            r#"
            INSERT INTO invoice_line_items (
                line_item_id, invoice_id, service_id, description, quantity, unit_price,
                discount_percent, tax_rate, line_total, sort_order
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(line.line_item_id)
        .bind(line.invoice_id)
        .bind(line.service_id)
        .bind(&line.description)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.discount_percent)
        .bind(line.tax_rate)
        .bind(line.line_total)
        .bind(line.sort_order)
        .execute(&mut *conn)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to add line item: {}", e)))?;
    }

    for tax in &new.taxes {
        let line = tax.into_tax_line(invoice_id);
        sqlx::query(
            r#"
            INSERT INTO invoice_tax_lines (
                tax_line_id, invoice_id, tax_type, tax_name, rate, taxable_amount, tax_amount
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(line.tax_line_id)
        .bind(line.invoice_id)
        .bind(line.tax_type.as_str())
        .bind(&line.tax_name)
        .bind(line.rate)
        .bind(line.taxable_amount)
        .bind(line.tax_amount)
        .execute(&mut *conn)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to add tax line: {}", e)))?;
    }

    Ok(invoice)
}

/// Versioned update inside the caller's transaction.
async fn update_invoice_versioned(
    conn: &mut PgConnection,
    invoice: &Invoice,
) -> Result<Invoice, BillingError> {
    let updated = sqlx::query_as::<_, Invoice>(&format!(
        r#"
        UPDATE invoices
        SET status = $3,
            paid_amount = $4,
            balance_amount = $5,
            paid_date = $6,
            recurrence_type = $7,
            recurrence_end = $8,
            last_generated_at = $9,
            successor_invoice_id = $10,
            notes = $11,
            updated_utc = $12,
            version = version + 1
        WHERE invoice_id = $1 AND version = $2
        RETURNING {INVOICE_COLUMNS}
        "#
    ))
    .bind(invoice.invoice_id)
    .bind(invoice.version)
    .bind(invoice.status.as_str())
    .bind(invoice.paid_amount)
    .bind(invoice.balance_amount)
    .bind(invoice.paid_date)
    .bind(invoice.recurrence_type.as_str())
    .bind(invoice.recurrence_end)
    .bind(invoice.last_generated_at)
    .bind(invoice.successor_invoice_id)
    .bind(&invoice.notes)
    .bind(invoice.updated_utc)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

    if let Some(updated) = updated {
        return Ok(updated);
    }

    let exists = sqlx::query_scalar::<_, i64>("SELECT version FROM invoices WHERE invoice_id = $1")
        .bind(invoice.invoice_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to check invoice: {}", e)))?;

    match exists {
        Some(found) => Err(BillingError::ConcurrencyConflict(format!(
            "Invoice {} changed concurrently (expected version {}, found {})",
            invoice.invoice_number, invoice.version, found
        ))),
        None => Err(BillingError::not_found("Invoice", invoice.invoice_id)),
    }
}

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), BillingError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| BillingError::Storage(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self, invoice), fields(customer_id = %invoice.customer_id))]
    async fn create_invoice(&self, invoice: NewInvoice) -> Result<Invoice, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;
        let created = insert_invoice(&mut tx, &invoice).await?;
        commit(tx).await?;

        timer.observe_duration();

        info!(
            invoice_id = %created.invoice_id,
            invoice_number = %created.invoice_number,
            "Invoice created"
        );

        Ok(created)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self), fields(request_id = %request_id))]
    async fn find_invoice_by_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Invoice>, BillingError> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE request_id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            BillingError::Storage(anyhow::anyhow!("Failed to find invoice by request: {}", e))
        })
    }

    #[instrument(skip(self, filter))]
    async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE ($1::varchar IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR customer_id = $2)
              AND ($3::timestamptz IS NULL OR issue_date >= $3)
              AND ($4::timestamptz IS NULL OR issue_date < $4)
              AND ($5::uuid IS NULL OR invoice_id > $5)
            ORDER BY invoice_id
            LIMIT $6
            "#
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.customer_id)
        .bind(filter.issued_from)
        .bind(filter.issued_to)
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    async fn get_line_items(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLineItem>, BillingError> {
        sqlx::query_as::<_, InvoiceLineItem>(
            r#"
            SELECT line_item_id, invoice_id, service_id, description, quantity, unit_price,
                discount_percent, tax_rate, line_total, sort_order
            FROM invoice_line_items
            WHERE invoice_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to get line items: {}", e)))
    }

    async fn get_tax_lines(&self, invoice_id: Uuid) -> Result<Vec<InvoiceTaxLine>, BillingError> {
        sqlx::query_as::<_, InvoiceTaxLine>(
            r#"
            SELECT tax_line_id, invoice_id, tax_type, tax_name, rate, taxable_amount, tax_amount
            FROM invoice_tax_lines
            WHERE invoice_id = $1
            ORDER BY tax_type DESC
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to get tax lines: {}", e)))
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id, version = invoice.version))]
    async fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let mut conn = self.pool.acquire().await.map_err(|e| {
            BillingError::Storage(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;
        let updated = update_invoice_versioned(&mut conn, invoice).await?;

        timer.observe_duration();

        Ok(updated)
    }

    #[instrument(skip(self, transaction, invoice), fields(amount = %transaction.amount))]
    async fn record_payment(
        &self,
        transaction: NewTransaction,
        invoice: Option<&Invoice>,
    ) -> Result<(Transaction, Option<Invoice>), BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let mut tx = self.begin().await?;

        let updated = match invoice {
            Some(invoice) => Some(update_invoice_versioned(&mut tx, invoice).await?),
            None => None,
        };

        let recorded = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            INSERT INTO transactions (
                transaction_id, transaction_number, transaction_type, status, amount,
                payment_method, payment_reference, invoice_id, customer_id, description,
                notes, processed_by, created_utc
            )
            VALUES ($1, next_document_number($2, $3), $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(DocumentKind::Transaction.prefix())
        .bind(sequence_year(transaction.created_utc))
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.status.as_str())
        .bind(transaction.amount)
        .bind(transaction.payment_method.as_str())
        .bind(&transaction.payment_reference)
        .bind(transaction.invoice_id)
        .bind(transaction.customer_id)
        .bind(&transaction.description)
        .bind(&transaction.notes)
        .bind(&transaction.processed_by)
        .bind(transaction.created_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to record payment: {}", e)))?;

        commit(tx).await?;

        timer.observe_duration();

        info!(
            transaction_id = %recorded.transaction_id,
            transaction_number = %recorded.transaction_number,
            amount = %recorded.amount,
            "Payment recorded"
        );

        Ok((recorded, updated))
    }

    async fn get_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, BillingError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE transaction_id = $1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to get transaction: {}", e)))
    }

    async fn list_transactions(&self, invoice_id: Uuid) -> Result<Vec<Transaction>, BillingError> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE invoice_id = $1
            ORDER BY created_utc, transaction_number
            "#
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to list transactions: {}", e)))
    }

    #[instrument(skip(self, parent, successor), fields(parent_id = %parent.invoice_id))]
    async fn create_successor(
        &self,
        parent: &Invoice,
        successor: NewInvoice,
    ) -> Result<(Invoice, Invoice), BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_successor"])
            .start_timer();

        let mut tx = self.begin().await?;

        let current = sqlx::query_as::<_, (Option<Uuid>, i64)>(
            "SELECT successor_invoice_id, version FROM invoices WHERE invoice_id = $1 FOR UPDATE",
        )
        .bind(parent.invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to lock invoice: {}", e)))?;

        match current {
            None => return Err(BillingError::not_found("Invoice", parent.invoice_id)),
            Some((Some(existing), _)) => {
                return Err(BillingError::Conflict(format!(
                    "Invoice {} already has successor {}",
                    parent.invoice_number, existing
                )))
            }
            Some((None, version)) if version != parent.version => {
                return Err(BillingError::ConcurrencyConflict(format!(
                    "Invoice {} changed concurrently",
                    parent.invoice_number
                )))
            }
            Some(_) => {}
        }

        let created = insert_invoice(&mut tx, &successor).await?;

        let mut linked = parent.clone();
        linked.successor_invoice_id = Some(created.invoice_id);
        linked.last_generated_at = Some(created.issue_date);
        linked.updated_utc = created.issue_date;
        let linked = update_invoice_versioned(&mut tx, &linked).await?;

        commit(tx).await?;

        timer.observe_duration();

        Ok((linked, created))
    }

    async fn recurrence_heads(
        &self,
        now: DateTime<Utc>,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Invoice>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["recurrence_heads"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE recurrence_type <> 'NONE'
              AND recurrence_end >= $1
              AND status <> 'CANCELLED'
              AND successor_invoice_id IS NULL
              AND ($2::uuid IS NULL OR invoice_id > $2)
            ORDER BY invoice_id
            LIMIT $3
            "#
        ))
        .bind(now)
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            BillingError::Storage(anyhow::anyhow!("Failed to load recurring invoices: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoices)
    }

    async fn reminder_candidates(
        &self,
        now: DateTime<Utc>,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Invoice>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reminder_candidates"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE status IN ('SENT', 'PARTIAL_PAID', 'OVERDUE')
              AND due_date < $1
              AND balance_amount > 0
              AND ($2::uuid IS NULL OR invoice_id > $2)
            ORDER BY invoice_id
            LIMIT $3
            "#
        ))
        .bind(now)
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            BillingError::Storage(anyhow::anyhow!("Failed to load reminder candidates: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoices)
    }

    async fn latest_reminder(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<PaymentReminder>, BillingError> {
        sqlx::query_as::<_, PaymentReminder>(&format!(
            r#"
            SELECT {REMINDER_COLUMNS}
            FROM payment_reminders
            WHERE invoice_id = $1
            ORDER BY created_utc DESC
            LIMIT 1
            "#
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to get last reminder: {}", e)))
    }

    #[instrument(skip(self, reminder), fields(invoice_id = %reminder.invoice_id, level = reminder.reminder_level))]
    async fn insert_reminder(
        &self,
        reminder: NewReminder,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<Option<PaymentReminder>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_reminder"])
            .start_timer();

        let mut tx = self.begin().await?;

        // Serializes reminder writers per invoice until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(reminder.invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to lock invoice: {}", e)))?;

        if let Some(cutoff) = not_after {
            let recent = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM payment_reminders WHERE invoice_id = $1 AND created_utc > $2)",
            )
            .bind(reminder.invoice_id)
            .bind(cutoff)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                BillingError::Storage(anyhow::anyhow!("Failed to check reminders: {}", e))
            })?;

            if recent {
                tx.rollback().await.ok();
                return Ok(None);
            }
        }

        let stored = sqlx::query_as::<_, PaymentReminder>(&format!(
            r#"
            INSERT INTO payment_reminders (
                reminder_id, invoice_id, reminder_level, due_date, amount, method, status,
                sent_by, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {REMINDER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(reminder.invoice_id)
        .bind(reminder.reminder_level)
        .bind(reminder.due_date)
        .bind(reminder.amount)
        .bind(reminder.method.as_str())
        .bind(reminder.status.as_str())
        .bind(&reminder.sent_by)
        .bind(reminder.created_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to insert reminder: {}", e)))?;

        commit(tx).await?;

        timer.observe_duration();

        Ok(Some(stored))
    }

    #[instrument(skip(self))]
    async fn set_reminder_status(
        &self,
        reminder_id: Uuid,
        status: ReminderStatus,
    ) -> Result<PaymentReminder, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_reminder_status"])
            .start_timer();

        let updated = sqlx::query_as::<_, PaymentReminder>(&format!(
            r#"
            UPDATE payment_reminders
            SET status = $2
            WHERE reminder_id = $1
            RETURNING {REMINDER_COLUMNS}
            "#
        ))
        .bind(reminder_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            BillingError::Storage(anyhow::anyhow!("Failed to update reminder: {}", e))
        })?;

        timer.observe_duration();

        updated.ok_or_else(|| BillingError::not_found("Reminder", reminder_id))
    }

    async fn list_reminders(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentReminder>, BillingError> {
        sqlx::query_as::<_, PaymentReminder>(&format!(
            r#"
            SELECT {REMINDER_COLUMNS}
            FROM payment_reminders
            WHERE invoice_id = $1
            ORDER BY created_utc DESC
            "#
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Storage(anyhow::anyhow!("Failed to list reminders: {}", e)))
    }

    #[instrument(skip(self))]
    async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<u64, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_overdue"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $1, version = version + 1, updated_utc = $2
            WHERE status IN ('SENT', 'PARTIAL_PAID')
              AND due_date < $2
              AND balance_amount > 0
            "#,
        )
        .bind(InvoiceStatus::Overdue.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            BillingError::Storage(anyhow::anyhow!("Failed to mark overdue invoices: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    async fn invoices_issued_between(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Invoice>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["invoices_issued_between"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE ($1::timestamptz IS NULL OR issue_date >= $1)
              AND ($2::timestamptz IS NULL OR issue_date < $2)
            "#
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            BillingError::Storage(anyhow::anyhow!("Failed to load invoices for report: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoices)
    }

    async fn outstanding_invoices(&self) -> Result<Vec<Invoice>, BillingError> {
        sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE status IN ('SENT', 'PARTIAL_PAID', 'OVERDUE')
              AND balance_amount > 0
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            BillingError::Storage(anyhow::anyhow!("Failed to load outstanding invoices: {}", e))
        })
    }
}

fn directory_unavailable(what: &str, e: sqlx::Error) -> BillingError {
    warn!(error = %e, "Directory lookup failed");
    BillingError::UpstreamUnavailable(format!("{} lookup failed: {}", what, e))
}

#[async_trait]
impl CustomerDirectory for Database {
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, BillingError> {
        sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE customer_id = $1"
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| directory_unavailable("Customer", e))
    }

    #[instrument(skip(self), fields(patient_id = %patient_id))]
    async fn get_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, BillingError> {
        sqlx::query_as::<_, Patient>(
            r#"
            SELECT patient_id, first_name, last_name, email, phone, address
            FROM patients
            WHERE patient_id = $1
            "#,
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| directory_unavailable("Patient", e))
    }

    #[instrument(skip(self, patient), fields(patient_id = %patient.patient_id))]
    async fn find_or_create_individual(
        &self,
        patient: &Patient,
    ) -> Result<Customer, BillingError> {
        let name = patient.full_name();

        let existing = sqlx::query_as::<_, Customer>(&format!(
            r#"
            SELECT {CUSTOMER_COLUMNS}
            FROM customers
            WHERE customer_type = $1 AND name = $2
            ORDER BY created_utc
            LIMIT 1
            "#
        ))
        .bind(CustomerType::Individual.as_str())
        .bind(&name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| directory_unavailable("Customer", e))?;

        if let Some(customer) = existing {
            return Ok(customer);
        }

        let customer = sqlx::query_as::<_, Customer>(&format!(
            r#"
            INSERT INTO customers (customer_id, customer_type, name, address, email, phone)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {CUSTOMER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(CustomerType::Individual.as_str())
        .bind(&name)
        .bind(&patient.address)
        .bind(&patient.email)
        .bind(&patient.phone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| directory_unavailable("Customer", e))?;

        info!(customer_id = %customer.customer_id, "Walk-in customer created");

        Ok(customer)
    }
}

#[async_trait]
impl RequestSource for Database {
    #[instrument(skip(self), fields(request_id = %request_id))]
    async fn get_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<ServiceRequest>, BillingError> {
        let patient_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT patient_id FROM lab_requests WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| directory_unavailable("Request", e))?;

        let Some(patient_id) = patient_id else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, RequestedAnalysis>(
            r#"
            SELECT analysis_id, name, price, override_price, tax_rate
            FROM lab_request_items
            WHERE request_id = $1
            ORDER BY name
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| directory_unavailable("Request", e))?;

        Ok(Some(ServiceRequest {
            request_id,
            patient_id,
            items,
        }))
    }
}

#[cfg(test)]
mod tests {
    const SCHEMA: &str = include_str!("../../migrations/20260101000001_billing_schema.sql");

    fn table_definition(name: &str) -> &'static str {
        let header = format!("CREATE TABLE IF NOT EXISTS {} (", name);
        let start = SCHEMA.find(&header).expect("table is defined");
        let body = &SCHEMA[start..];
        &body[..body.find(");").expect("table definition is closed")]
    }

    #[test]
    fn line_items_and_tax_lines_are_deleted_with_their_invoice() {
        for table in ["invoice_line_items", "invoice_tax_lines"] {
            let definition = table_definition(table);
            assert!(
                definition.contains("REFERENCES invoices (invoice_id) ON DELETE CASCADE"),
                "{} must cascade from invoices",
                table
            );
        }
    }

    #[test]
    fn transactions_and_reminders_are_not_cascaded() {
        for table in ["transactions", "payment_reminders"] {
            assert!(!table_definition(table).contains("ON DELETE CASCADE"));
        }
    }
}
