use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::ContingencyService;
use crate::error::ContingencyError;
use crate::models::{
    CompanyProfile, ContingencyEvent, Credentials, Environment, FailureStage,
    NewContingencyEvent, QueueItem,
};

pub const EVENT_SCHEMA_VERSION: i32 = 3;

/// Catalog 005: the authority's reception system was unavailable.
pub const TIPO_AUTHORITY_UNAVAILABLE: i32 = 1;
/// Catalog 005: the issuer's own system was unavailable.
pub const TIPO_ISSUER_UNAVAILABLE: i32 = 2;
/// Catalog 005: other; requires a free-text reason.
pub const TIPO_OTHER: i32 = 5;

const MOTIVO_MAX_CHARS: usize = 500;
const FALLBACK_UTC_OFFSET_WEST_SECS: i32 = 6 * 3600;

/// Civil time zone the event window is declared in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl LocalZone {
    /// Unknown names fall back to a fixed UTC-6 offset.
    pub fn from_name(name: &str) -> Self {
        match name.parse::<Tz>() {
            Ok(tz) => LocalZone::Named(tz),
            Err(_) => {
                tracing::warn!(zone = name, "unknown time zone, declaring events in UTC-6");
                Self::fallback()
            }
        }
    }

    pub fn fallback() -> Self {
        LocalZone::Fixed(
            FixedOffset::west_opt(FALLBACK_UTC_OFFSET_WEST_SECS).unwrap_or_else(|| Utc.fix()),
        )
    }

    /// `(YYYY-MM-DD, HH:MM:SS)` of `ts` in this zone.
    pub fn date_and_time(&self, ts: DateTime<Utc>) -> (String, String) {
        match self {
            LocalZone::Named(tz) => split(ts.with_timezone(tz)),
            LocalZone::Fixed(offset) => split(ts.with_timezone(offset)),
        }
    }
}

fn split<Z: TimeZone>(ts: DateTime<Z>) -> (String, String)
where
    Z::Offset: std::fmt::Display,
{
    (
        ts.format("%Y-%m-%d").to_string(),
        ts.format("%H:%M:%S").to_string(),
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    pub identificacion: Identificacion,
    pub emisor: Emisor,
    #[serde(rename = "detalleDTE")]
    pub detalle_dte: Vec<DetalleDte>,
    pub motivo: Motivo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identificacion {
    pub version: i32,
    pub ambiente: Environment,
    pub codigo_generacion: String,
    pub f_transmision: String,
    pub h_transmision: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Emisor {
    pub nit: String,
    pub nombre: String,
    pub nombre_responsable: String,
    pub tipo_doc_responsable: String,
    pub numero_doc_responsable: String,
    pub tipo_establecimiento: String,
    #[serde(rename = "codEstableMH")]
    pub cod_estable_mh: Option<String>,
    pub cod_punto_venta: Option<String>,
    pub telefono: String,
    pub correo: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetalleDte {
    pub no_item: i32,
    pub codigo_generacion: String,
    pub tipo_doc: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Motivo {
    pub f_inicio: String,
    pub f_fin: String,
    pub h_inicio: String,
    pub h_fin: String,
    pub tipo_contingencia: i32,
    pub motivo_contingencia: Option<String>,
}

/// Earliest and latest failure time of the covered documents.
pub fn outage_window(items: &[QueueItem]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = items.iter().map(|i| i.failure_timestamp).min()?;
    let end = items.iter().map(|i| i.failure_timestamp).max()?;
    Some((start, end))
}

/// Contingency type and, for type 5, the free-text reason.
pub fn contingency_reason(items: &[QueueItem]) -> (i32, Option<String>) {
    if items.iter().any(|i| i.failure_stage.is_authority_side()) {
        return (TIPO_AUTHORITY_UNAVAILABLE, None);
    }
    if !items.is_empty() && items.iter().all(|i| i.failure_stage == FailureStage::Signing) {
        return (TIPO_ISSUER_UNAVAILABLE, None);
    }

    let mut reasons: Vec<&str> = Vec::new();
    for item in items {
        let reason = match item.failure_reason.trim() {
            "" => item.failure_stage.as_str(),
            r => r,
        };
        if !reasons.contains(&reason) {
            reasons.push(reason);
        }
    }
    let motivo: String = reasons.join("; ").chars().take(MOTIVO_MAX_CHARS).collect();
    (TIPO_OTHER, Some(motivo))
}

pub fn build_event_payload(
    profile: &CompanyProfile,
    items: &[QueueItem],
    codigo_generacion: &str,
    ambiente: Environment,
    zone: LocalZone,
    transmitted_at: DateTime<Utc>,
) -> Option<EventPayload> {
    let (start, end) = outage_window(items)?;
    let (f_transmision, h_transmision) = zone.date_and_time(transmitted_at);
    let (f_inicio, h_inicio) = zone.date_and_time(start);
    let (f_fin, h_fin) = zone.date_and_time(end);
    let (tipo_contingencia, motivo_contingencia) = contingency_reason(items);

    Some(EventPayload {
        identificacion: Identificacion {
            version: EVENT_SCHEMA_VERSION,
            ambiente,
            codigo_generacion: codigo_generacion.to_string(),
            f_transmision,
            h_transmision,
        },
        emisor: Emisor {
            nit: profile.nit.clone(),
            nombre: profile.legal_name.clone(),
            nombre_responsable: profile.legal_representative_name.clone(),
            tipo_doc_responsable: profile.legal_representative_doc_type.clone(),
            numero_doc_responsable: profile.legal_representative_doc_number.clone(),
            tipo_establecimiento: profile.establishment_type.clone(),
            cod_estable_mh: profile.establishment_code_mh.clone(),
            cod_punto_venta: profile.point_of_sale_code.clone(),
            telefono: profile.phone.clone(),
            correo: profile.email.clone(),
        },
        detalle_dte: items
            .iter()
            .enumerate()
            .map(|(idx, item)| DetalleDte {
                no_item: idx as i32 + 1,
                codigo_generacion: item.codigo_generacion.clone(),
                tipo_doc: item.tipo_dte.clone(),
            })
            .collect(),
        motivo: Motivo {
            f_inicio,
            f_fin,
            h_inicio,
            h_fin,
            tipo_contingencia,
            motivo_contingencia,
        },
    })
}

impl ContingencyService {
    /// Declare one contingency event covering the company's oldest pending documents.
    ///
    /// Nothing is persisted unless the authority answers `RECIBIDO`; any
    /// earlier failure costs each included item one retry.
    pub async fn build_and_submit_event(
        &self,
        company_id: Uuid,
    ) -> Result<ContingencyEvent, ContingencyError> {
        let max = self.settings.max_documents;
        let candidates = self
            .store
            .list_pending_by_company(company_id, max as i64)
            .await?;
        let Some(oldest) = candidates.first() else {
            return Err(ContingencyError::NoPendingDocuments(company_id));
        };
        if candidates.len() > max {
            return Err(ContingencyError::TooManyDocuments {
                count: candidates.len(),
                max,
            });
        }

        // One environment per event; the rest wait for the next tick.
        let ambiente = oldest.ambiente;
        let (items, deferred): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|i| i.ambiente == ambiente);
        if !deferred.is_empty() {
            tracing::debug!(
                %company_id,
                deferred = deferred.len(),
                "documents for another environment left for a later event"
            );
        }

        let (profile, creds) = match self.load_company(company_id).await {
            Ok(found) => found,
            Err(e) => return Err(self.fail_items(&items, e).await),
        };

        let items = self.sign_unsigned(company_id, &creds, items).await?;

        match self
            .declare_event(company_id, &profile, &creds, ambiente, &items)
            .await
        {
            Ok(event) => {
                let mut linked = 0usize;
                for item in &items {
                    match self.store.link_to_event(item.id, event.id).await {
                        Ok(true) => linked += 1,
                        Ok(false) => tracing::warn!(
                            item_id = %item.id,
                            event_id = %event.id,
                            "queue item left pending state before it could be linked"
                        ),
                        Err(e) => tracing::error!(
                            item_id = %item.id,
                            event_id = %event.id,
                            error = %e,
                            "failed to link queue item to event"
                        ),
                    }
                }
                tracing::info!(
                    %company_id,
                    event_id = %event.id,
                    codigo_generacion = %event.codigo_generacion,
                    tipo_contingencia = event.tipo_contingencia,
                    documents = event.dte_count,
                    linked,
                    "contingency event accepted"
                );
                Ok(event)
            }
            Err(e) => {
                tracing::warn!(
                    %company_id,
                    documents = items.len(),
                    error = %e,
                    "contingency event not accepted, retry counts incremented"
                );
                Err(self.fail_items(&items, e).await)
            }
        }
    }

    async fn load_company(
        &self,
        company_id: Uuid,
    ) -> Result<(CompanyProfile, Credentials), ContingencyError> {
        let profile = self.directory.company_profile(company_id).await?;
        let creds = self.credentials.load_credentials(company_id).await?;
        Ok((profile, creds))
    }

    /// Sign documents that were queued before they could be signed. Items that
    /// still cannot be signed are dropped from this attempt and lose a retry.
    async fn sign_unsigned(
        &self,
        company_id: Uuid,
        creds: &Credentials,
        items: Vec<QueueItem>,
    ) -> Result<Vec<QueueItem>, ContingencyError> {
        let mut ready = Vec::with_capacity(items.len());
        let mut last_error = None;

        for mut item in items {
            if item.signed_payload().is_some() {
                ready.push(item);
                continue;
            }

            let outcome = match self.sign_document(creds, &item).await {
                Ok(signed) => self
                    .store
                    .attach_signature(item.id, &signed)
                    .await
                    .map(|attached| attached.then_some(signed))
                    .map_err(ContingencyError::from),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(Some(signed)) => {
                    item.dte_signed = Some(signed);
                    ready.push(item);
                }
                Ok(None) => {
                    tracing::warn!(item_id = %item.id, "queue item changed while being signed, skipped");
                }
                Err(e) => {
                    tracing::warn!(
                        item_id = %item.id,
                        codigo_generacion = %item.codigo_generacion,
                        error = %e,
                        "queued document could not be signed"
                    );
                    last_error = Some(self.fail_items(std::slice::from_ref(&item), e).await);
                }
            }
        }

        if ready.is_empty() {
            return Err(last_error.unwrap_or(ContingencyError::NoPendingDocuments(company_id)));
        }
        Ok(ready)
    }

    async fn sign_document(
        &self,
        creds: &Credentials,
        item: &QueueItem,
    ) -> Result<String, ContingencyError> {
        let payload: Value = serde_json::from_slice(&item.dte_unsigned)?;
        Ok(self
            .signer
            .sign(&creds.nit, &creds.signer_password, &payload)
            .await?)
    }

    async fn declare_event(
        &self,
        company_id: Uuid,
        profile: &CompanyProfile,
        creds: &Credentials,
        ambiente: Environment,
        items: &[QueueItem],
    ) -> Result<ContingencyEvent, ContingencyError> {
        let codigo_generacion = Uuid::new_v4().hyphenated().to_string().to_uppercase();
        let (fecha_inicio, fecha_fin) =
            outage_window(items).ok_or(ContingencyError::NoPendingDocuments(company_id))?;
        let payload = build_event_payload(
            profile,
            items,
            &codigo_generacion,
            ambiente,
            self.settings.zone,
            Utc::now(),
        )
        .ok_or(ContingencyError::NoPendingDocuments(company_id))?;
        let event_unsigned = serde_json::to_value(&payload)?;

        let event_signed = self
            .signer
            .sign(&creds.nit, &creds.signer_password, &event_unsigned)
            .await?;
        let token = self.authority.authenticate(company_id).await?;
        let receipt = self
            .authority
            .submit_contingency_event(&token, &creds.nit, &event_signed)
            .await?;

        if !receipt.is_received() {
            let mut message = receipt.mensaje.clone().unwrap_or_default();
            if !receipt.observaciones.is_empty() {
                message.push_str(&format!(" [{}]", receipt.observaciones.join("; ")));
            }
            return Err(ContingencyError::EventRefused {
                estado: receipt.estado,
                message,
            });
        }

        let hacienda_response = serde_json::to_value(&receipt)?;
        let event = self
            .store
            .insert_event(NewContingencyEvent {
                codigo_generacion,
                company_id,
                ambiente,
                dte_count: items.len() as i32,
                fecha_inicio,
                fecha_fin,
                tipo_contingencia: payload.motivo.tipo_contingencia,
                motivo_contingencia: payload.motivo.motivo_contingencia.clone(),
                event_unsigned,
                event_signed,
                sello_recibido: receipt.sello_recibido,
                hacienda_response,
            })
            .await?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentRef, QueueStatus};
    use chrono::TimeZone;

    fn item(stage: FailureStage, reason: &str, at: DateTime<Utc>) -> QueueItem {
        QueueItem {
            id: Uuid::now_v7(),
            document: DocumentRef::Invoice(Uuid::now_v7()),
            tipo_dte: "01".into(),
            codigo_generacion: Uuid::new_v4().to_string().to_uppercase(),
            ambiente: Environment::Test,
            failure_stage: stage,
            failure_reason: reason.into(),
            failure_timestamp: at,
            dte_unsigned: b"{}".to_vec(),
            dte_signed: Some("jws".into()),
            contingency_event_id: None,
            batch_id: None,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: 5,
            sello_recibido: None,
            rejection_reason: None,
            hacienda_response: None,
            company_id: Uuid::nil(),
            created_at: at,
            updated_at: at,
            completed_at: None,
        }
    }

    fn profile() -> CompanyProfile {
        CompanyProfile {
            id: Uuid::nil(),
            nit: "06142803901121".into(),
            legal_name: "Comercial El Faro, S.A. de C.V.".into(),
            commercial_name: None,
            legal_representative_name: "Ana Pérez".into(),
            legal_representative_doc_type: "13".into(),
            legal_representative_doc_number: "012345678".into(),
            establishment_type: "02".into(),
            establishment_code_mh: Some("M001".into()),
            point_of_sale_code: None,
            phone: "22223333".into(),
            email: "facturacion@elfaro.sv".into(),
        }
    }

    #[test]
    fn window_spans_oldest_to_newest_failure() {
        let a = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();
        let items = vec![
            item(FailureStage::Signing, "x", b),
            item(FailureStage::Signing, "x", a),
        ];
        assert_eq!(outage_window(&items), Some((a, b)));
        assert_eq!(outage_window(&[]), None);
    }

    #[test]
    fn authority_failures_declare_type_one() {
        let now = Utc::now();
        let items = vec![
            item(FailureStage::Signing, "firmador down", now),
            item(FailureStage::AuthoritySubmission, "timeout", now),
        ];
        assert_eq!(contingency_reason(&items), (TIPO_AUTHORITY_UNAVAILABLE, None));
    }

    #[test]
    fn signing_only_failures_declare_type_two() {
        let now = Utc::now();
        let items = vec![item(FailureStage::Signing, "firmador down", now)];
        assert_eq!(contingency_reason(&items), (TIPO_ISSUER_UNAVAILABLE, None));
    }

    #[test]
    fn other_failures_carry_distinct_reasons() {
        let now = Utc::now();
        let items = vec![
            item(FailureStage::Other("disk_full".into()), "disk full", now),
            item(FailureStage::Other("disk_full".into()), "disk full", now),
            item(FailureStage::Signing, "firmador down", now),
            item(FailureStage::Other("power".into()), "", now),
        ];
        let (tipo, motivo) = contingency_reason(&items);
        assert_eq!(tipo, TIPO_OTHER);
        assert_eq!(motivo.as_deref(), Some("disk full; firmador down; power"));
    }

    #[test]
    fn reason_is_capped() {
        let now = Utc::now();
        let long = "x".repeat(800);
        let items = vec![item(FailureStage::Other("misc".into()), &long, now)];
        let (_, motivo) = contingency_reason(&items);
        assert_eq!(motivo.map(|m| m.chars().count()), Some(MOTIVO_MAX_CHARS));
    }

    #[test]
    fn payload_uses_local_civil_time() {
        // 2025-03-02 03:15 UTC is 2025-03-01 21:15 in El Salvador (UTC-6, no DST).
        let failed = Utc.with_ymd_and_hms(2025, 3, 2, 3, 15, 0).unwrap();
        let items = vec![item(FailureStage::AuthorityAuth, "401", failed)];
        let payload = build_event_payload(
            &profile(),
            &items,
            "ABC",
            Environment::Test,
            LocalZone::from_name("America/El_Salvador"),
            failed,
        )
        .unwrap();

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["identificacion"]["version"], 3);
        assert_eq!(json["identificacion"]["ambiente"], "00");
        assert_eq!(json["emisor"]["codEstableMH"], "M001");
        assert!(json["emisor"]["codPuntoVenta"].is_null());
        assert_eq!(json["detalleDTE"][0]["noItem"], 1);
        assert_eq!(json["detalleDTE"][0]["tipoDoc"], "01");
        assert_eq!(json["motivo"]["fInicio"], "2025-03-01");
        assert_eq!(json["motivo"]["hInicio"], "21:15:00");
        assert_eq!(json["motivo"]["fFin"], "2025-03-01");
        assert_eq!(json["motivo"]["tipoContingencia"], 1);
    }

    #[test]
    fn unknown_zone_falls_back_to_utc_minus_six() {
        let zone = LocalZone::from_name("Mars/Olympus_Mons");
        assert_eq!(zone, LocalZone::fallback());
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 5, 0, 0).unwrap();
        assert_eq!(
            zone.date_and_time(ts),
            ("2024-12-31".to_string(), "23:00:00".to_string())
        );
    }
}
