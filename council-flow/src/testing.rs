//! In-crate oracle double shared by the unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{CouncilError, Result};
use crate::oracle::{Oracle, OracleRequest, OracleResponse};

type Responder = dyn Fn(&OracleRequest, usize) -> Result<OracleResponse> + Send + Sync;

/// Records every request and answers through a closure that sees the
/// request and its zero-based call index.
pub(crate) struct ScriptedOracle {
    responder: Box<Responder>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub(crate) fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&OracleRequest, usize) -> Result<OracleResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate(&self, request: &OracleRequest) -> Result<OracleResponse> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        (self.responder)(request, index)
    }
}

pub(crate) fn reply(text: impl Into<String>) -> Result<OracleResponse> {
    Ok(OracleResponse::text(text))
}

pub(crate) fn fail(message: &str) -> Result<OracleResponse> {
    Err(CouncilError::Oracle(message.to_string()))
}
