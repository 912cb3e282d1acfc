//! Scripted in-memory adapter shared by the integration tests.
#![allow(dead_code)]

use serde_json::{Value as JsonValue, json};
use sql_gateway::db::{Adapter, AdapterFactory, ProfileSet};
use sql_gateway::error::{DbError, DbResult};
use sql_gateway::models::{CompiledStatement, ConnectionProfile, Dialect, Params, ResultSet, Row};
use sql_gateway::orchestrator::Orchestrator;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Everything an adapter was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Create(Dialect),
    Connect,
    Fetch(String, Params),
    Execute(String, Params),
    Begin,
    Commit,
    Rollback,
    Close,
}

#[derive(Default)]
struct Shared {
    events: Vec<Event>,
    fetches: VecDeque<DbResult<ResultSet>>,
    execute: Option<DbResult<u64>>,
    connect_error: Option<DbError>,
    create_error: Option<DbError>,
}

/// Factory whose adapters replay scripted results and journal every call.
#[derive(Clone, Default)]
pub struct MockFactory {
    shared: Arc<Mutex<Shared>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `fetch_all`.
    pub fn push_rows(&self, rows: Vec<JsonValue>) -> &Self {
        self.lock().fetches.push_back(Ok(rows.iter().map(row).collect()));
        self
    }

    pub fn push_fetch_error(&self, err: DbError) -> &Self {
        self.lock().fetches.push_back(Err(err));
        self
    }

    pub fn set_affected(&self, result: DbResult<u64>) -> &Self {
        self.lock().execute = Some(result);
        self
    }

    pub fn fail_connect(&self, err: DbError) -> &Self {
        self.lock().connect_error = Some(err);
        self
    }

    pub fn fail_create(&self, err: DbError) -> &Self {
        self.lock().create_error = Some(err);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.lock().events.iter().filter(|e| *e == event).count()
    }

    /// SQL text of every fetch and execute, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Fetch(sql, _) | Event::Execute(sql, _) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap()
    }
}

impl AdapterFactory for MockFactory {
    type Adapter = MockAdapter;

    fn create(&self, dialect: Dialect, _profile: &ConnectionProfile) -> DbResult<MockAdapter> {
        let mut shared = self.lock();
        if let Some(err) = shared.create_error.clone() {
            return Err(err);
        }
        shared.events.push(Event::Create(dialect));
        Ok(MockAdapter {
            dialect,
            connected: false,
            shared: self.shared.clone(),
        })
    }
}

pub struct MockAdapter {
    dialect: Dialect,
    connected: bool,
    shared: Arc<Mutex<Shared>>,
}

impl MockAdapter {
    fn record(&self, event: Event) {
        self.shared.lock().unwrap().events.push(event);
    }

    fn ensure_connected(&mut self) -> DbResult<()> {
        if self.connected {
            return Ok(());
        }
        self.record(Event::Connect);
        if let Some(err) = self.shared.lock().unwrap().connect_error.clone() {
            return Err(err);
        }
        self.connected = true;
        Ok(())
    }
}

impl Adapter for MockAdapter {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn connect(&mut self) -> DbResult<()> {
        self.ensure_connected()
    }

    async fn fetch_all(&mut self, stmt: &CompiledStatement) -> DbResult<ResultSet> {
        self.ensure_connected()?;
        self.record(Event::Fetch(stmt.sql.clone(), stmt.params.clone()));
        self.shared
            .lock()
            .unwrap()
            .fetches
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn execute(&mut self, stmt: &CompiledStatement) -> DbResult<u64> {
        self.ensure_connected()?;
        self.record(Event::Execute(stmt.sql.clone(), stmt.params.clone()));
        self.shared.lock().unwrap().execute.clone().unwrap_or(Ok(1))
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.ensure_connected()?;
        self.record(Event::Begin);
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.record(Event::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.record(Event::Rollback);
        Ok(())
    }

    async fn close(&mut self) {
        self.connected = false;
        self.record(Event::Close);
    }
}

pub fn row(value: &JsonValue) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

/// Profiles with a configured default for every dialect plus a named MySQL one.
pub fn profiles() -> ProfileSet {
    let mut set = ProfileSet::new();
    for dialect in Dialect::ALL {
        set = set.with_default(
            dialect,
            ConnectionProfile::new("db.local", None, "app", "app", "secret"),
        );
    }
    set.with_named(
        Dialect::MySql,
        "reporting",
        ConnectionProfile::new("replica.local", None, "app", "app", "secret"),
    )
}

pub fn orchestrator(factory: &MockFactory) -> Orchestrator<MockFactory> {
    Orchestrator::new(profiles(), factory.clone())
}

pub fn users() -> Vec<JsonValue> {
    vec![
        json!({"id": 1, "username": "john"}),
        json!({"id": 2, "username": "jane"}),
    ]
}
