use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use pollstream::{
    decode_updates_response, FetchRequest, RawUpdate, SourceError, SourceFuture, UpdateId,
    UpdateSource,
};
use serde_json::json;
use tokio::time::sleep;

/// One scripted response of [`ScriptedSource`].
pub enum Step {
    Batch(Vec<UpdateId>),
    /// Raw response body run through the envelope decoder.
    Body(String),
    Fail(&'static str),
    /// Waits before returning the batch, simulating a long poll that finds data late.
    Delayed(Duration, Vec<UpdateId>),
    /// Panics inside the fetch.
    Panic(&'static str),
}

/// What the source does once the script runs out.
#[derive(Clone, Copy)]
pub enum Exhausted {
    /// Long-polls for the full request timeout and returns nothing.
    Idle,
    FailForever,
    /// Returns `batch_len` consecutive ids starting at the requested offset.
    Sequential { batch_len: usize },
}

struct Inner {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<FetchRequest>>,
    fetches: AtomicUsize,
    exhausted: Exhausted,
}

/// In-memory update source that replays a script and records every request.
#[derive(Clone)]
pub struct ScriptedSource {
    inner: Arc<Inner>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Step>, exhausted: Exhausted) -> Self {
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
                fetches: AtomicUsize::new(0),
                exhausted,
            }),
        }
    }

    pub fn sequential(batch_len: usize) -> Self {
        Self::new(Vec::new(), Exhausted::Sequential { batch_len })
    }

    pub fn fetches(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.inner.requests.lock().expect("requests poisoned").clone()
    }

    pub fn offsets(&self) -> Vec<Option<UpdateId>> {
        self.requests().iter().map(|request| request.offset).collect()
    }

    async fn respond(&self, request: &FetchRequest) -> Result<Vec<RawUpdate>, SourceError> {
        let step = self.inner.script.lock().expect("script poisoned").pop_front();
        match step {
            Some(Step::Batch(ids)) => Ok(raw_updates(&ids)),
            Some(Step::Body(body)) => decode_updates_response(body.as_bytes()),
            Some(Step::Fail(message)) => Err(SourceError::msg(message)),
            Some(Step::Delayed(delay, ids)) => {
                sleep(delay).await;
                Ok(raw_updates(&ids))
            }
            Some(Step::Panic(message)) => panic!("{message}"),
            None => match self.inner.exhausted {
                Exhausted::Idle => {
                    sleep(request.timeout).await;
                    Ok(Vec::new())
                }
                Exhausted::FailForever => Err(SourceError::msg("source unavailable")),
                Exhausted::Sequential { batch_len } => {
                    let start = request.offset.unwrap_or(1);
                    let ids: Vec<UpdateId> = (start..start + batch_len as UpdateId).collect();
                    Ok(raw_updates(&ids))
                }
            },
        }
    }
}

impl UpdateSource for ScriptedSource {
    type Update = RawUpdate;

    fn fetch_updates<'a>(&'a self, request: &'a FetchRequest) -> SourceFuture<'a, Vec<RawUpdate>> {
        Box::pin(async move {
            self.inner.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner
                .requests
                .lock()
                .expect("requests poisoned")
                .push(request.clone());
            self.respond(request).await
        })
    }
}

pub fn raw_updates(ids: &[UpdateId]) -> Vec<RawUpdate> {
    ids.iter()
        .map(|&id| {
            RawUpdate::new(id).with_field("message", json!({ "text": format!("update {id}") }))
        })
        .collect()
}

pub fn ids(batch: &[RawUpdate]) -> Vec<UpdateId> {
    batch.iter().map(|update| update.update_id).collect()
}
