#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lab_billing_service::config::BillingSettings;
use lab_billing_service::error::BillingError;
use lab_billing_service::models::{
    Customer, CustomerType, Invoice, InvoiceStatus, Patient, RequestedAnalysis, ServiceRequest,
};
use lab_billing_service::services::{
    init_metrics, BillTo, BillingDeps, BillingService, Clock, CreateInvoice, CustomerDirectory,
    InMemoryAuditSink, InMemoryStore, JsonDocumentRenderer, LineItemInput, ManualClock,
    NotificationDispatcher, ReminderNotice, RequestSource,
};
use lab_billing_service::startup::{build_router, AppState};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const TEST_USER_ID: &str = "frontdesk_01";

static INIT_METRICS: Once = Once::new();

pub fn ensure_metrics_initialized() {
    INIT_METRICS.call_once(|| {
        init_metrics();
    });
}

/// 2026-03-02 09:00 UTC, a Monday mid-quarter.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// Customers, patients and lab requests held in memory.
#[derive(Default)]
pub struct StaticDirectory {
    customers: RwLock<HashMap<Uuid, Customer>>,
    patients: RwLock<HashMap<Uuid, Patient>>,
    requests: RwLock<HashMap<Uuid, ServiceRequest>>,
    unavailable: AtomicBool,
}

impl StaticDirectory {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), BillingError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BillingError::UpstreamUnavailable(
                "directory offline".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn add_customer(&self, customer: Customer) {
        self.customers
            .write()
            .await
            .insert(customer.customer_id, customer);
    }

    pub async fn add_patient(&self, patient: Patient) {
        self.patients.write().await.insert(patient.patient_id, patient);
    }

    pub async fn add_request(&self, request: ServiceRequest) {
        self.requests.write().await.insert(request.request_id, request);
    }

    pub async fn customer_count(&self) -> usize {
        self.customers.read().await.len()
    }
}

#[async_trait]
impl CustomerDirectory for StaticDirectory {
    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, BillingError> {
        self.check()?;
        Ok(self.customers.read().await.get(&customer_id).cloned())
    }

    async fn get_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, BillingError> {
        self.check()?;
        Ok(self.patients.read().await.get(&patient_id).cloned())
    }

    async fn find_or_create_individual(
        &self,
        patient: &Patient,
    ) -> Result<Customer, BillingError> {
        self.check()?;
        let name = patient.full_name();
        let mut customers = self.customers.write().await;
        if let Some(existing) = customers
            .values()
            .find(|c| c.customer_type == CustomerType::Individual && c.name == name)
        {
            return Ok(existing.clone());
        }

        let customer = Customer {
            customer_id: Uuid::new_v4(),
            customer_type: CustomerType::Individual,
            name,
            address: patient.address.clone(),
            tax_id: None,
            email: patient.email.clone(),
            phone: patient.phone.clone(),
            payment_terms_days: None,
        };
        customers.insert(customer.customer_id, customer.clone());
        Ok(customer)
    }
}

#[async_trait]
impl RequestSource for StaticDirectory {
    async fn get_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<ServiceRequest>, BillingError> {
        self.check()?;
        Ok(self.requests.read().await.get(&request_id).cloned())
    }
}

/// Captures every notice; can be switched to fail or to deliver slowly.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: RwLock<Vec<ReminderNotice>>,
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: std::time::Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn notices(&self) -> Vec<ReminderNotice> {
        self.notices.read().await.clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn dispatch(&self, notice: &ReminderNotice) -> anyhow::Result<()> {
        let delay_ms = self.delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("SMTP relay refused the message"));
        }
        self.notices.write().await.push(notice.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub billing: Arc<BillingService>,
    pub store: InMemoryStore,
    pub directory: Arc<StaticDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: InMemoryAuditSink,
    pub clock: Arc<ManualClock>,
    pub settings: BillingSettings,
    /// Company customer on 30-day terms.
    pub clinic: Customer,
    pub patient: Patient,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::with_settings(BillingSettings::default()).await
    }

    pub async fn with_settings(settings: BillingSettings) -> Self {
        ensure_metrics_initialized();

        let store = InMemoryStore::new();
        let directory = Arc::new(StaticDirectory::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let audit = InMemoryAuditSink::default();
        let clock = Arc::new(ManualClock::new(start_time()));

        let clinic = Customer {
            customer_id: Uuid::new_v4(),
            customer_type: CustomerType::Company,
            name: "Clinique Atlas".to_string(),
            address: Some("12 Rue Ibn Sina, Rabat".to_string()),
            tax_id: Some("ICE001234567000089".to_string()),
            email: Some("compta@atlas.example".to_string()),
            phone: None,
            payment_terms_days: Some(30),
        };
        let patient = Patient {
            patient_id: Uuid::new_v4(),
            first_name: "Amina".to_string(),
            last_name: "Benali".to_string(),
            email: Some("amina@example.com".to_string()),
            phone: Some("+212600000000".to_string()),
            address: None,
        };
        directory.add_customer(clinic.clone()).await;
        directory.add_patient(patient.clone()).await;

        let billing = Arc::new(BillingService::new(billing_deps(
            &store, &directory, &notifier, &audit, &clock, &settings,
        )));

        Self {
            billing,
            store,
            directory,
            notifier,
            audit,
            clock,
            settings,
            clinic,
            patient,
        }
    }

    /// Another service instance over the same store and collaborators, as a
    /// second node in a deployment would run.
    pub fn second_node(&self) -> Arc<BillingService> {
        Arc::new(BillingService::new(billing_deps(
            &self.store,
            &self.directory,
            &self.notifier,
            &self.audit,
            &self.clock,
            &self.settings,
        )))
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn router(&self) -> axum::Router {
        build_router(AppState {
            billing: self.billing.clone(),
        })
    }

    /// Lab request for the test patient with the given catalog prices.
    pub async fn seed_request(&self, prices: &[Decimal]) -> Uuid {
        let request = ServiceRequest {
            request_id: Uuid::new_v4(),
            patient_id: self.patient.patient_id,
            items: prices
                .iter()
                .enumerate()
                .map(|(i, price)| RequestedAnalysis {
                    analysis_id: Uuid::new_v4(),
                    name: format!("Analysis {}", i + 1),
                    price: *price,
                    override_price: None,
                    tax_rate: None,
                })
                .collect(),
        };
        let request_id = request.request_id;
        self.directory.add_request(request).await;
        request_id
    }

    /// Invoice to the clinic in the given status (DRAFT or SENT).
    pub async fn invoice_for_clinic(
        &self,
        items: Vec<LineItemInput>,
        status: InvoiceStatus,
    ) -> Invoice {
        let mut input = CreateInvoice::new(BillTo::Customer(self.clinic.customer_id), items);
        input.initial_status = Some(status);
        self.billing
            .create_invoice(input, TEST_USER_ID)
            .await
            .expect("Failed to create invoice")
    }

    /// SENT clinic invoice with a single line of `amount`.
    pub async fn sent_invoice(&self, amount: Decimal) -> Invoice {
        self.invoice_for_clinic(
            vec![item("Lipid panel", dec!(1), amount, dec!(0))],
            InvoiceStatus::Sent,
        )
        .await
    }
}

fn billing_deps(
    store: &InMemoryStore,
    directory: &Arc<StaticDirectory>,
    notifier: &Arc<RecordingNotifier>,
    audit: &InMemoryAuditSink,
    clock: &Arc<ManualClock>,
    settings: &BillingSettings,
) -> BillingDeps {
    BillingDeps {
        store: Arc::new(store.clone()),
        directory: directory.clone(),
        requests: directory.clone(),
        audit: Arc::new(audit.clone()),
        notifier: notifier.clone(),
        renderer: Arc::new(JsonDocumentRenderer),
        clock: clock.clone(),
        settings: settings.clone(),
    }
}

pub fn item(
    description: &str,
    quantity: Decimal,
    unit_price: Decimal,
    discount: Decimal,
) -> LineItemInput {
    LineItemInput {
        service_id: None,
        description: description.to_string(),
        quantity,
        unit_price,
        discount_percent: discount,
        tax_rate: None,
    }
}

/// Settings with both tax rates at zero, so totals equal line sums.
pub fn untaxed_settings() -> BillingSettings {
    BillingSettings {
        vat_percent: Decimal::ZERO,
        stamp_tax_percent: Decimal::ZERO,
        ..BillingSettings::default()
    }
}
