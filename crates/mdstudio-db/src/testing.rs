//! Scripted database used by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use mdstudio_core::{AsyncValue, Document, Error};

use crate::database::{Database, DbVerb};

/// Answers each verb from a queue of prepared responses and records requests.
#[derive(Default)]
pub struct ScriptedDatabase {
    responses: Mutex<HashMap<DbVerb, VecDeque<AsyncValue<Document>>>>,
    requests: Mutex<Vec<(DbVerb, Document)>>,
}

impl ScriptedDatabase {
    /// Queue a resolved response for `verb`.
    pub fn push(&self, verb: DbVerb, response: Document) {
        self.push_value(verb, AsyncValue::resolved(response));
    }

    /// Queue an arbitrary (possibly pending or failed) response for `verb`.
    pub fn push_value(&self, verb: DbVerb, response: AsyncValue<Document>) {
        self.responses
            .lock()
            .unwrap()
            .entry(verb)
            .or_default()
            .push_back(response);
    }

    /// Requests received for `verb`, in order.
    pub fn calls(&self, verb: DbVerb) -> Vec<Document> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(v, _)| *v == verb)
            .map(|(_, request)| request.clone())
            .collect()
    }
}

impl Database for ScriptedDatabase {
    fn execute(&self, verb: DbVerb, request: Document) -> AsyncValue<Document> {
        self.requests.lock().unwrap().push((verb, request));
        self.responses
            .lock()
            .unwrap()
            .get_mut(&verb)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                AsyncValue::failed(Error::failed(format!("no response scripted for {verb:?}")))
            })
    }
}
