//! Applies payments to invoice balances.
//!
//! The transaction row and the invoice's paid/balance/status change are
//! written as one unit by the store. The invoice update is versioned, so two
//! operators paying the same invoice at once cannot both compute from the
//! same stale balance: the loser re-reads and re-applies.

use crate::error::BillingError;
use crate::models::{
    ApplyPayment, Invoice, NewTransaction, Transaction, TransactionStatus, TransactionType,
};
use crate::services::audit::{AuditAction, AuditEvent, AuditSeverity};
use crate::services::context::BillingDeps;
use crate::services::metrics::{ERRORS_TOTAL, OVERPAYMENTS_TOTAL, PAYMENTS_TOTAL, PAYMENT_AMOUNT_TOTAL};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub transaction: Transaction,
    pub invoice: Option<Invoice>,
    /// Amount received beyond the invoice total, if any.
    pub overpayment: Option<Decimal>,
}

pub struct PaymentApplicator {
    deps: BillingDeps,
}

impl PaymentApplicator {
    pub fn new(deps: BillingDeps) -> Self {
        Self { deps }
    }

    #[instrument(skip(self, payment), fields(invoice_id = ?payment.invoice_id, amount = %payment.amount))]
    pub async fn apply_payment(
        &self,
        payment: ApplyPayment,
        actor: &str,
    ) -> Result<PaymentOutcome, BillingError> {
        let method = payment.payment_method;
        let result = self.apply(&payment, actor).await;

        match &result {
            Ok(outcome) => {
                let status = outcome
                    .invoice
                    .as_ref()
                    .map(|i| i.status.as_str())
                    .unwrap_or("UNLINKED");
                PAYMENTS_TOTAL
                    .with_label_values(&[method.as_str(), status])
                    .inc();
                let currency = outcome
                    .invoice
                    .as_ref()
                    .map(|i| i.currency.as_str())
                    .unwrap_or(self.deps.settings.default_currency.as_str());
                PAYMENT_AMOUNT_TOTAL
                    .with_label_values(&[currency])
                    .inc_by(outcome.transaction.amount.to_f64().unwrap_or(0.0));
            }
            Err(e) => {
                let outcome = match e {
                    BillingError::Storage(_) | BillingError::UpstreamUnavailable(_) => "failed",
                    _ => "rejected",
                };
                PAYMENTS_TOTAL
                    .with_label_values(&[method.as_str(), outcome])
                    .inc();
                ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
            }
        }

        result
    }

    async fn apply(
        &self,
        payment: &ApplyPayment,
        actor: &str,
    ) -> Result<PaymentOutcome, BillingError> {
        if payment.amount <= Decimal::ZERO {
            return Err(BillingError::InvalidInput(format!(
                "Payment amount must be positive, got {}",
                payment.amount
            )));
        }

        let outcome = match payment.invoice_id {
            Some(invoice_id) => {
                self.deps
                    .with_lock_retry("apply_payment", || {
                        self.apply_to_invoice(invoice_id, payment, actor)
                    })
                    .await?
            }
            None => self.record_unlinked(payment, actor).await?,
        };

        let transaction = &outcome.transaction;
        if let Some(excess) = outcome.overpayment {
            OVERPAYMENTS_TOTAL.inc();
            warn!(
                transaction_number = %transaction.transaction_number,
                invoice_id = ?transaction.invoice_id,
                overpayment = %excess,
                "Payment exceeds invoice balance"
            );
        }

        info!(
            transaction_id = %transaction.transaction_id,
            transaction_number = %transaction.transaction_number,
            amount = %transaction.amount,
            invoice_status = ?outcome.invoice.as_ref().map(|i| i.status),
            "Payment applied"
        );

        let severity = if outcome.overpayment.is_some() {
            AuditSeverity::Warning
        } else {
            AuditSeverity::Info
        };
        self.deps
            .record_audit(
                AuditEvent::new(
                    AuditAction::PaymentApplied,
                    actor,
                    transaction.transaction_id,
                    transaction.created_utc,
                )
                .with_severity(severity)
                .with_after(&json!({
                    "transaction_number": transaction.transaction_number,
                    "amount": transaction.amount,
                    "invoice_id": transaction.invoice_id,
                    "invoice_status": outcome.invoice.as_ref().map(|i| i.status),
                    "balance_amount": outcome.invoice.as_ref().map(|i| i.balance_amount),
                    "overpayment": outcome.overpayment,
                })),
            )
            .await;

        Ok(outcome)
    }

    async fn apply_to_invoice(
        &self,
        invoice_id: Uuid,
        payment: &ApplyPayment,
        actor: &str,
    ) -> Result<PaymentOutcome, BillingError> {
        let invoice = self
            .deps
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))?;

        if let Some(customer_id) = payment.customer_id {
            if customer_id != invoice.customer_id {
                return Err(BillingError::InvalidInput(format!(
                    "Invoice {} belongs to another customer",
                    invoice.invoice_number
                )));
            }
        }
        if !invoice.status.accepts_payment() {
            return Err(BillingError::Conflict(format!(
                "Invoice {} is {} and cannot accept payments",
                invoice.invoice_number, invoice.status
            )));
        }

        let now = self.deps.now();
        let effect = invoice.payment_effect(payment.amount, now);
        let mut updated = invoice.clone();
        updated.apply_payment_effect(&effect);
        updated.updated_utc = now;

        let transaction = self.new_transaction(payment, invoice.customer_id, Some(invoice_id), actor);
        let (transaction, stored) = self
            .deps
            .store
            .record_payment(transaction, Some(&updated))
            .await?;

        Ok(PaymentOutcome {
            transaction,
            invoice: stored,
            overpayment: effect.overpayment(),
        })
    }

    async fn record_unlinked(
        &self,
        payment: &ApplyPayment,
        actor: &str,
    ) -> Result<PaymentOutcome, BillingError> {
        let customer_id = payment.customer_id.ok_or_else(|| {
            BillingError::InvalidInput(
                "A payment without an invoice needs a customer".to_string(),
            )
        })?;
        if self.deps.directory.get_customer(customer_id).await?.is_none() {
            return Err(BillingError::not_found("Customer", customer_id));
        }

        let transaction = self.new_transaction(payment, customer_id, None, actor);
        let (transaction, _) = self.deps.store.record_payment(transaction, None).await?;

        Ok(PaymentOutcome {
            transaction,
            invoice: None,
            overpayment: None,
        })
    }

    fn new_transaction(
        &self,
        payment: &ApplyPayment,
        customer_id: Uuid,
        invoice_id: Option<Uuid>,
        actor: &str,
    ) -> NewTransaction {
        NewTransaction {
            transaction_type: TransactionType::Payment,
            status: TransactionStatus::Completed,
            amount: payment.amount,
            payment_method: payment.payment_method,
            payment_reference: payment.payment_reference.clone(),
            invoice_id,
            customer_id,
            description: payment.description.clone(),
            notes: payment.notes.clone(),
            processed_by: Some(actor.to_string()),
            created_utc: self.deps.now(),
        }
    }

    pub async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, BillingError> {
        self.deps
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Transaction", transaction_id))
    }
}
