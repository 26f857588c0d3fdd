//! In-memory capability fakes for tests.

use crate::error::{EmailError, EventError, StoreError, StoreResult, SummarizerError};
use crate::events::EventBus;
use crate::models::AnalysisResult;
use crate::notify::{EmailMessage, EmailSender};
use crate::storage::{sort_newest_first, ObjectStore, RecordPage, RecordStore};
use crate::summarizer::Summarizer;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    fail_prefix: Mutex<Option<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, body: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), body.to_vec());
    }

    /// Make every write under `prefix` fail.
    pub fn fail_writes_under(&self, prefix: &str) {
        *self.fail_prefix.lock().unwrap() = Some(prefix.to_string());
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    fn check_write(&self, key: &str) -> StoreResult<()> {
        match self.fail_prefix.lock().unwrap().as_deref() {
            Some(prefix) if key.starts_with(prefix) => Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(bucket, key))
    }

    async fn put(&self, bucket: &str, key: &str, body: &[u8], _content_type: &str) -> StoreResult<()> {
        self.check_write(key)?;
        self.insert(bucket, key, body);
        Ok(())
    }

    async fn put_if_absent(&self, bucket: &str, key: &str, body: &[u8]) -> StoreResult<bool> {
        self.check_write(key)?;
        let mut objects = self.objects.lock().unwrap();
        let id = (bucket.to_string(), key.to_string());
        if objects.contains_key(&id) {
            return Ok(false);
        }
        objects.insert(id, body.to_vec());
        Ok(true)
    }

    async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<AnalysisResult>>,
    fail_puts: Mutex<bool>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self) {
        *self.fail_puts.lock().unwrap() = true;
    }

    pub fn all(&self) -> Vec<AnalysisResult> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, record: &AnalysisResult) -> StoreResult<()> {
        if *self.fail_puts.lock().unwrap() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected put failure",
            )));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn query(&self, correlation_id: &str, limit: usize) -> StoreResult<Vec<AnalysisResult>> {
        let mut found: Vec<AnalysisResult> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.correlation_id == correlation_id)
            .cloned()
            .collect();
        sort_newest_first(&mut found);
        found.truncate(limit);
        Ok(found)
    }

    async fn scan(&self, token: Option<&str>, page_size: usize) -> StoreResult<RecordPage> {
        let offset = token
            .map(|t| t.parse::<usize>().map_err(|_| StoreError::InvalidToken(t.to_string())))
            .transpose()?
            .unwrap_or(0);
        let records = self.records.lock().unwrap();
        let next = offset + page_size.max(1);
        Ok(RecordPage {
            items: records.iter().skip(offset).take(page_size.max(1)).cloned().collect(),
            next_token: (next < records.len()).then(|| next.to_string()),
        })
    }

    async fn update_notification(
        &self,
        correlation_id: &str,
        analysis_id: &str,
        timestamp: &str,
    ) -> StoreResult<bool> {
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.correlation_id == correlation_id && r.analysis_id == analysis_id)
        {
            Some(record) => {
                record.notification_sent = true;
                record.notification_timestamp = Some(timestamp.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Records published events; optionally fails every publish.
#[derive(Default)]
pub struct MemoryEventBus {
    events: Mutex<Vec<(String, String, Value)>>,
    fail: bool,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// `(source, detail_type, detail)` in publish order.
    pub fn events(&self) -> Vec<(String, String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn of_type(&self, detail_type: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|(_, t, _)| t == detail_type)
            .map(|(_, _, d)| d)
            .collect()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, source: &str, detail_type: &str, detail: Value) -> Result<String, EventError> {
        if self.fail {
            return Err(EventError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected publish failure",
            )));
        }
        let mut events = self.events.lock().unwrap();
        events.push((source.to_string(), detail_type.to_string(), detail));
        Ok(format!("evt-{}", events.len()))
    }
}

/// Replays scripted responses in order, then repeats the fallback.
pub struct ScriptedSummarizer {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: String,
    calls: AtomicUsize,
}

impl ScriptedSummarizer {
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: r#"{"insights": [], "recommendations": [], "summary": "Vitals stable."}"#.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer with `response`.
    pub fn always(response: &str) -> Self {
        Self {
            fallback: response.to_string(),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn invoke(&self, _prompt: &str) -> Result<String, SummarizerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(SummarizerError::Request(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Fails a fixed number of times before succeeding.
pub struct FlakyEmailSender {
    failures: usize,
    attempts: AtomicUsize,
    sent: Mutex<Vec<EmailMessage>>,
}

impl FlakyEmailSender {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for FlakyEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(EmailError::Transport("relay unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
