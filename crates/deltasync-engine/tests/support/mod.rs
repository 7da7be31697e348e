//! Shared fakes for orchestrator tests: a scripted source, a schema-driven
//! mapper, and a recording target with programmable failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deltasync_engine::adapters::{Mapped, RawPayload, RecordMapper, SourceAdapter, TargetAdapter};
use deltasync_engine::cancel::CancelToken;
use deltasync_store::BaselineStore;
use deltasync_types::{
    CrudKind, Field, FieldSet, Result, Schema, SingleResult, SingleStatus, SyncError,
};

/// Source that yields whatever JSON payload was scripted last.
pub struct JsonSource {
    payload: Mutex<RawPayload>,
}

impl JsonSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            payload: Mutex::new(RawPayload::Null),
        })
    }

    pub fn set(&self, payload: RawPayload) {
        *self.payload.lock().unwrap() = payload;
    }
}

#[async_trait]
impl SourceAdapter for JsonSource {
    async fn fetch_raw(&self, cancel: &CancelToken) -> Result<RawPayload> {
        cancel.check("source pull")?;
        Ok(self.payload.lock().unwrap().clone())
    }
}

/// Mapper that expects an array of JSON objects and emits fields in schema
/// order.
pub struct SchemaMapper {
    schema: Schema,
}

impl SchemaMapper {
    pub fn new(schema: Schema) -> Arc<Self> {
        Arc::new(Self { schema })
    }
}

impl RecordMapper for SchemaMapper {
    fn map(&self, raw: RawPayload) -> Result<Mapped> {
        let rows = raw
            .as_array()
            .ok_or_else(|| SyncError::parse("source payload is not an array"))?;
        let records = rows
            .iter()
            .map(|row| {
                let object = row
                    .as_object()
                    .ok_or_else(|| SyncError::parse("source row is not an object"))?;
                let fields = self
                    .schema
                    .fields
                    .iter()
                    .filter_map(|def| {
                        object
                            .get(&def.name)
                            .map(|value| Field::new(def.name.clone(), value.clone()))
                    })
                    .collect();
                Ok(FieldSet::new(fields))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Mapped {
            schema: self.schema.clone(),
            records,
        })
    }
}

/// Target that records every push and fails the scripted pk tuples.
pub struct RecordingTarget {
    pk_fields: Vec<String>,
    fail_pks: Mutex<HashSet<String>>,
    pushes: Mutex<Vec<(String, CrudKind)>>,
}

impl RecordingTarget {
    pub fn new(pk_fields: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            pk_fields,
            fail_pks: Mutex::new(HashSet::new()),
            pushes: Mutex::new(Vec::new()),
        })
    }

    pub fn fail(&self, pk: &str) {
        self.fail_pks.lock().unwrap().insert(pk.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_pks.lock().unwrap().clear();
    }

    pub fn pushes(&self) -> Vec<(String, CrudKind)> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn reset_pushes(&self) {
        self.pushes.lock().unwrap().clear();
    }
}

#[async_trait]
impl TargetAdapter for RecordingTarget {
    async fn push_one(
        &self,
        record: &FieldSet,
        crud: CrudKind,
        cancel: &CancelToken,
    ) -> Result<SingleResult> {
        cancel.check("target push")?;
        let pk = record.pk_string(&self.pk_fields);
        self.pushes.lock().unwrap().push((pk.clone(), crud));
        let status = if self.fail_pks.lock().unwrap().contains(&pk) {
            SingleStatus::Failure
        } else {
            SingleStatus::Success
        };
        Ok(SingleResult {
            status,
            primary_key: record.field_values.clone(),
            crud,
            message: (status == SingleStatus::Failure).then(|| "target rejected".to_string()),
        })
    }
}

/// The committed baseline as a `pk -> hash` map.
pub async fn baseline_map(
    store: &Arc<dyn BaselineStore>,
    client_id: &str,
    pk_fields: &[String],
) -> HashMap<String, String> {
    store
        .fetch_previous(client_id, pk_fields, None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| {
            let pk = r.pk_string(pk_fields);
            (pk, r.hash.unwrap_or_default())
        })
        .collect()
}
