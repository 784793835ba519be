#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use dte_contingency::authority::{
    Authority, AuthorityError, BatchReceipt, BatchStatusReport, DocumentResult, EventReceipt,
};
use dte_contingency::company::{CompanyDirectory, CompanyError, CredentialStore};
use dte_contingency::contingency::{
    Collaborators, ContingencyService, EnqueueRequest, PipelineSettings,
};
use dte_contingency::documents::BusinessDocuments;
use dte_contingency::error::StoreError;
use dte_contingency::models::{
    CompanyProfile, Credentials, DocumentRef, Environment, FailureStage, NewContingencyEvent,
};
use dte_contingency::signer::{Signer, SignerError};
use dte_contingency::state::AppState;
use dte_contingency::store::MemoryStore;

pub const ADMIN_TOKEN: &str = "test-admin-token-0123456789";

// ── Fake collaborators ─────────────────────────────────────────

/// Companies known to the directory; anything else is `NotFound`.
#[derive(Default)]
pub struct FakeCompanies {
    known: Mutex<HashSet<Uuid>>,
}

impl FakeCompanies {
    pub fn add(&self, company_id: Uuid) {
        self.known.lock().unwrap().insert(company_id);
    }

    fn check(&self, company_id: Uuid) -> Result<(), CompanyError> {
        if self.known.lock().unwrap().contains(&company_id) {
            Ok(())
        } else {
            Err(CompanyError::NotFound(company_id))
        }
    }
}

#[async_trait]
impl CompanyDirectory for FakeCompanies {
    async fn company_profile(&self, company_id: Uuid) -> Result<CompanyProfile, CompanyError> {
        self.check(company_id)?;
        Ok(CompanyProfile {
            id: company_id,
            nit: "06142803901121".into(),
            legal_name: "Comercial El Faro, S.A. de C.V.".into(),
            commercial_name: Some("El Faro".into()),
            legal_representative_name: "Ana Pérez".into(),
            legal_representative_doc_type: "13".into(),
            legal_representative_doc_number: "012345678".into(),
            establishment_type: "02".into(),
            establishment_code_mh: Some("M001".into()),
            point_of_sale_code: Some("P001".into()),
            phone: "22223333".into(),
            email: "facturacion@elfaro.sv".into(),
        })
    }
}

#[async_trait]
impl CredentialStore for FakeCompanies {
    async fn load_credentials(&self, company_id: Uuid) -> Result<Credentials, CompanyError> {
        self.check(company_id)?;
        Ok(Credentials {
            nit: "06142803901121".into(),
            signer_password: "firma".into(),
            authority_password: "clave".into(),
        })
    }
}

#[derive(Default)]
pub struct FakeSigner {
    pub down: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Signer for FakeSigner {
    async fn sign(&self, nit: &str, _password: &str, payload: &Value) -> Result<String, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(SignerError::Unavailable("connection refused".into()));
        }
        let codigo = payload["identificacion"]["codigoGeneracion"]
            .as_str()
            .unwrap_or("doc");
        Ok(format!("jws.{nit}.{codigo}"))
    }
}

/// Scripted authority. Status reports are served in order; once drained every
/// query returns an empty report.
pub struct FakeAuthority {
    pub event_estado: Mutex<String>,
    pub event_error: Mutex<Option<AuthorityError>>,
    pub batch_estado: Mutex<String>,
    pub reports: Mutex<VecDeque<BatchStatusReport>>,
    pub submitted_events: Mutex<Vec<String>>,
    pub submitted_batches: Mutex<Vec<Vec<String>>>,
    pub lotes: AtomicUsize,
    pub sessions: Mutex<HashSet<Uuid>>,
}

impl Default for FakeAuthority {
    fn default() -> Self {
        Self {
            event_estado: Mutex::new("RECIBIDO".into()),
            event_error: Mutex::new(None),
            batch_estado: Mutex::new("RECIBIDO".into()),
            reports: Mutex::new(VecDeque::new()),
            submitted_events: Mutex::new(Vec::new()),
            submitted_batches: Mutex::new(Vec::new()),
            lotes: AtomicUsize::new(0),
            sessions: Mutex::new(HashSet::new()),
        }
    }
}

impl FakeAuthority {
    pub fn set_event_estado(&self, estado: &str) {
        *self.event_estado.lock().unwrap() = estado.to_string();
    }

    pub fn fail_events_with(&self, err: Option<AuthorityError>) {
        *self.event_error.lock().unwrap() = err;
    }

    pub fn set_batch_estado(&self, estado: &str) {
        *self.batch_estado.lock().unwrap() = estado.to_string();
    }

    pub fn push_report(&self, report: BatchStatusReport) {
        self.reports.lock().unwrap().push_back(report);
    }

    pub fn batch_submissions(&self) -> usize {
        self.submitted_batches.lock().unwrap().len()
    }
}

#[async_trait]
impl Authority for FakeAuthority {
    async fn authenticate(&self, company_id: Uuid) -> Result<String, AuthorityError> {
        self.sessions.lock().unwrap().insert(company_id);
        Ok("Bearer test".into())
    }

    fn invalidate_token(&self, company_id: Uuid) -> bool {
        self.sessions.lock().unwrap().remove(&company_id)
    }

    async fn submit_contingency_event(
        &self,
        _token: &str,
        _nit: &str,
        signed_event: &str,
    ) -> Result<EventReceipt, AuthorityError> {
        if let Some(err) = self.event_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.submitted_events
            .lock()
            .unwrap()
            .push(signed_event.to_string());
        let estado = self.event_estado.lock().unwrap().clone();
        Ok(EventReceipt {
            sello_recibido: (estado == "RECIBIDO").then(|| "SELLO-EVENTO".to_string()),
            mensaje: Some(if estado == "RECIBIDO" { "ok" } else { "evento invalido" }.into()),
            estado,
            ..Default::default()
        })
    }

    async fn submit_batch(
        &self,
        _token: &str,
        _ambiente: Environment,
        _nit: &str,
        documents: &[String],
    ) -> Result<BatchReceipt, AuthorityError> {
        self.submitted_batches
            .lock()
            .unwrap()
            .push(documents.to_vec());
        let estado = self.batch_estado.lock().unwrap().clone();
        let received = estado == "RECIBIDO";
        let n = self.lotes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(BatchReceipt {
            codigo_lote: received.then(|| format!("LOTE-{n}")),
            descripcion_msg: Some(if received { "RECIBIDO" } else { "lote rechazado" }.into()),
            estado,
            ..Default::default()
        })
    }

    async fn query_batch_status(
        &self,
        _token: &str,
        _codigo_lote: &str,
    ) -> Result<BatchStatusReport, AuthorityError> {
        Ok(self.reports.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// What the pipeline wrote to the invoice/purchase records.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMark {
    pub status: &'static str,
    pub sello: Option<String>,
    pub reason: Option<String>,
}

#[derive(Default)]
pub struct RecordingDocuments {
    pub marks: Mutex<HashMap<Uuid, DocumentMark>>,
}

impl RecordingDocuments {
    pub fn mark(&self, document: DocumentRef) -> Option<DocumentMark> {
        self.marks.lock().unwrap().get(&document.id()).cloned()
    }
}

#[async_trait]
impl BusinessDocuments for RecordingDocuments {
    async fn mark_accepted(
        &self,
        document: DocumentRef,
        sello: &str,
        _response: &Value,
    ) -> Result<bool, StoreError> {
        self.marks.lock().unwrap().insert(
            document.id(),
            DocumentMark {
                status: "PROCESADO",
                sello: Some(sello.to_string()),
                reason: None,
            },
        );
        Ok(true)
    }

    async fn mark_rejected(
        &self,
        document: DocumentRef,
        reason: &str,
        _response: &Value,
    ) -> Result<bool, StoreError> {
        self.marks.lock().unwrap().insert(
            document.id(),
            DocumentMark {
                status: "RECHAZADO",
                sello: None,
                reason: Some(reason.to_string()),
            },
        );
        Ok(true)
    }
}

// ── Pipeline harness ───────────────────────────────────────────

pub struct Pipeline {
    pub service: Arc<ContingencyService>,
    pub store: Arc<MemoryStore>,
    pub companies: Arc<FakeCompanies>,
    pub signer: Arc<FakeSigner>,
    pub authority: Arc<FakeAuthority>,
    pub documents: Arc<RecordingDocuments>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_settings(PipelineSettings::default())
    }

    pub fn with_settings(settings: PipelineSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let companies = Arc::new(FakeCompanies::default());
        let signer = Arc::new(FakeSigner::default());
        let authority = Arc::new(FakeAuthority::default());
        let documents = Arc::new(RecordingDocuments::default());

        let service = Arc::new(ContingencyService::new(
            Collaborators {
                store: store.clone(),
                documents: documents.clone(),
                directory: companies.clone(),
                credentials: companies.clone(),
                signer: signer.clone(),
                authority: authority.clone(),
            },
            settings,
        ));

        Self {
            service,
            store,
            companies,
            signer,
            authority,
            documents,
        }
    }

    pub fn company(&self) -> Uuid {
        let id = Uuid::now_v7();
        self.companies.add(id);
        id
    }
}

pub fn new_codigo() -> String {
    Uuid::new_v4().to_string().to_uppercase()
}

/// A failed invoice as the normal submission path would report it.
pub fn failed_invoice(company_id: Uuid, stage: &str, failed_at: DateTime<Utc>) -> EnqueueRequest {
    let codigo = new_codigo();
    let signed = if FailureStage::from(stage) == FailureStage::Signing {
        None
    } else {
        Some(format!("jws.doc.{codigo}"))
    };
    EnqueueRequest {
        document: DocumentRef::Invoice(Uuid::now_v7()),
        tipo_dte: "01".into(),
        dte_unsigned: json!({
            "identificacion": { "version": 1, "tipoDte": "01", "codigoGeneracion": codigo }
        }),
        codigo_generacion: codigo,
        ambiente: Environment::Test,
        failure_stage: FailureStage::from(stage),
        failure_reason: format!("{stage} during normal submission"),
        dte_signed: signed,
        company_id,
        failed_at: Some(failed_at),
    }
}

/// An event row as the event stage would store it after the authority accepted it.
pub fn accepted_event(company_id: Uuid, dte_count: i32) -> NewContingencyEvent {
    let now = Utc::now();
    NewContingencyEvent {
        codigo_generacion: new_codigo(),
        company_id,
        ambiente: Environment::Test,
        dte_count,
        fecha_inicio: now - chrono::Duration::hours(1),
        fecha_fin: now,
        tipo_contingencia: 1,
        motivo_contingencia: None,
        event_unsigned: json!({ "identificacion": { "version": 3 } }),
        event_signed: "jws.evento".into(),
        sello_recibido: Some("SELLO-EVENTO".into()),
        hacienda_response: json!({ "estado": "RECIBIDO" }),
    }
}

pub fn processed(codigo: &str, sello: &str) -> DocumentResult {
    DocumentResult {
        estado: "PROCESADO".into(),
        codigo_generacion: codigo.to_string(),
        sello_recibido: Some(sello.to_string()),
        descripcion_msg: Some("RECIBIDO".into()),
        ..Default::default()
    }
}

pub fn rejected(codigo: &str, reason: &str) -> DocumentResult {
    DocumentResult {
        estado: "RECHAZADO".into(),
        codigo_generacion: codigo.to_string(),
        descripcion_msg: Some(reason.to_string()),
        ..Default::default()
    }
}

pub fn report(procesados: Vec<DocumentResult>, rechazados: Vec<DocumentResult>) -> BatchStatusReport {
    BatchStatusReport {
        procesados,
        rechazados,
    }
}

// ── HTTP harness ───────────────────────────────────────────────

/// A running API server backed by the in-memory pipeline.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub pipeline: Pipeline,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get_auth(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn delete_auth(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .delete(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("delete request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn post_auth(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .json(body)
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

/// Spawn the operator API on a random port.
pub async fn spawn_app() -> TestApp {
    let pipeline = Pipeline::new();
    let state = Arc::new(AppState {
        service: pipeline.service.clone(),
        admin_token: ADMIN_TOKEN.to_string(),
    });
    let app = dte_contingency::build_app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        pipeline,
    }
}

// ── Postgres harness ───────────────────────────────────────────

pub struct TestDb {
    pub pool: PgPool,
    pub db_name: String,
    base_url: String,
}

fn with_database(url: &str, db_name: &str) -> String {
    url.rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| url.to_string())
}

/// Create a throwaway migrated database, or `None` when `DATABASE_URL` is unset.
pub async fn provision_db() -> Option<TestDb> {
    let _ = dotenvy::dotenv();
    let base_url = std::env::var("DATABASE_URL").ok()?;
    let db_name = format!("dte_contingency_test_{}", Uuid::now_v7().simple());

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&with_database(&base_url, "postgres"))
        .await
        .expect("Failed to connect to postgres for test DB creation");
    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");
    admin_pool.close().await;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&with_database(&base_url, &db_name))
        .await
        .expect("Failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    Some(TestDb {
        pool,
        db_name,
        base_url,
    })
}

/// Drop the test database.
pub async fn cleanup(db: TestDb) {
    db.pool.close().await;
    if let Ok(admin_pool) = PgPoolOptions::new()
        .max_connections(2)
        .connect(&with_database(&db.base_url, "postgres"))
        .await
    {
        let _ = sqlx::query(&format!(
            "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
            db.db_name
        ))
        .execute(&admin_pool)
        .await;
        admin_pool.close().await;
    }
}
