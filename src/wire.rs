use std::fmt::Debug;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::BookerAuthSource;
use crate::engine::{now_ms, Applicant, Engine, EngineError, SlotRow};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, RequestFilter};
use crate::tenant::{TenantManager, DEFAULT_TENANT};

/// Query handler for one connection.
pub struct BookerHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<BookerQueryParser>,
    /// Set during startup when the session authenticated as an admin.
    admin_login: Arc<AtomicBool>,
}

impl BookerHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, admin_login: Arc<AtomicBool>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(BookerQueryParser),
            admin_login,
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| DEFAULT_TENANT.to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// The admin behind this session, if it logged in with the admin password.
    fn session_admin<C: ClientInfo>(&self, client: &C, engine: &Engine) -> Option<Admin> {
        if !self.admin_login.load(Ordering::Acquire) {
            return None;
        }
        let user = client.metadata().get("user")?;
        engine.find_admin_by_name(user)
    }

    fn require_admin<C: ClientInfo>(&self, client: &C, engine: &Engine) -> PgWireResult<Admin> {
        self.session_admin(client, engine).ok_or_else(|| {
            metrics::counter!(observability::PERMISSION_DENIED_TOTAL).increment(1);
            user_error("42501", "permission denied: admin session required".into())
        })
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(client, &engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command<C: ClientInfo>(
        &self,
        client: &C,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertPlace {
                id,
                name,
                map_link,
                frame_link,
                description,
            } => {
                self.require_admin(client, engine)?;
                engine
                    .create_place(id, name, map_link, frame_link, description)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertAdmin { id, name } => {
                // The first admin of a tenant bootstraps itself.
                if engine.has_admins() {
                    self.require_admin(client, engine)?;
                }
                engine.create_admin(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertPhoto { id, place_id, url } => {
                self.require_admin(client, engine)?;
                engine.add_photo(id, place_id, url).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertRequest {
                id,
                place_id,
                full_name,
                phone,
                contact_link,
                start,
                end,
                message,
            } => {
                let applicant = Applicant {
                    full_name,
                    phone,
                    contact_link,
                };
                engine
                    .submit_request(id, place_id, applicant, start, end, message)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertDecision {
                request_id,
                approved,
                message,
            } => {
                let admin = self.require_admin(client, engine)?;
                engine
                    .decide(request_id, approved, message, Some(admin.id))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectPlaces => {
                let places = engine.list_places().await;
                Ok(vec![places_response(&places)?])
            }
            Command::SelectAdmins => {
                self.require_admin(client, engine)?;
                Ok(vec![admins_response(&engine.list_admins())?])
            }
            Command::SelectPhotos { place_id } => {
                let photos = engine.list_photos(place_id).await.map_err(engine_err)?;
                Ok(vec![photos_response(&photos)?])
            }
            Command::SelectRequests { filter } => {
                self.require_admin(client, engine)?;
                let views = match filter {
                    RequestFilter::All => engine.list_requests(None).await.map_err(engine_err)?,
                    RequestFilter::Place(place_id) => engine
                        .list_requests(Some(place_id))
                        .await
                        .map_err(engine_err)?,
                    RequestFilter::Id(id) => engine.get_request(id).await.into_iter().collect(),
                };
                Ok(vec![requests_response(&views)?])
            }
            Command::SelectApprovedIntervals { place_id } => {
                let spans = engine
                    .list_approved_intervals(place_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![intervals_response(place_id, &spans)?])
            }
            Command::SelectSlots { place_id, now } => {
                let rows = engine
                    .slots(place_id, now.unwrap_or_else(now_ms))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![slots_response(&rows)?])
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn places_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("map_link", Type::VARCHAR),
        field("frame_link", Type::VARCHAR),
        field("description", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

fn admins_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

fn photos_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("place_id", Type::VARCHAR),
        field("url", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

fn requests_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("place_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("status", Type::VARCHAR),
        field("full_name", Type::VARCHAR),
        field("phone", Type::VARCHAR),
        field("contact_link", Type::VARCHAR),
        field("message", Type::VARCHAR),
        field("decision_message", Type::VARCHAR),
        field("admin", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

fn intervals_schema() -> Vec<FieldInfo> {
    vec![
        field("place_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        field("day", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("disabled", Type::BOOL),
    ]
}

fn places_response(places: &[Place]) -> PgWireResult<Response> {
    let schema = Arc::new(places_schema());
    let rows: Vec<PgWireResult<_>> = places
        .iter()
        .map(|p| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&p.id.to_string())?;
            encoder.encode_field(&p.name)?;
            encoder.encode_field(&p.map_link)?;
            encoder.encode_field(&p.frame_link)?;
            encoder.encode_field(&p.description)?;
            encoder.encode_field(&p.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn admins_response(admins: &[Admin]) -> PgWireResult<Response> {
    let schema = Arc::new(admins_schema());
    let rows: Vec<PgWireResult<_>> = admins
        .iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&a.id.to_string())?;
            encoder.encode_field(&a.name)?;
            encoder.encode_field(&a.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn photos_response(photos: &[Photo]) -> PgWireResult<Response> {
    let schema = Arc::new(photos_schema());
    let rows: Vec<PgWireResult<_>> = photos
        .iter()
        .map(|p| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&p.id.to_string())?;
            encoder.encode_field(&p.place_id.to_string())?;
            encoder.encode_field(&p.url)?;
            encoder.encode_field(&p.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn requests_response(views: &[RequestView]) -> PgWireResult<Response> {
    let schema = Arc::new(requests_schema());
    let rows: Vec<PgWireResult<_>> = views
        .iter()
        .map(|v| {
            let user = v.user.as_ref();
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&v.request.id.to_string())?;
            encoder.encode_field(&v.request.place_id.to_string())?;
            encoder.encode_field(&v.request.span.start)?;
            encoder.encode_field(&v.request.span.end)?;
            encoder.encode_field(&v.status.as_str().to_string())?;
            encoder.encode_field(&user.map(|u| u.full_name.clone()))?;
            encoder.encode_field(&user.map(|u| u.phone.clone()))?;
            encoder.encode_field(&user.map(|u| u.contact_link.clone()))?;
            encoder.encode_field(&v.request.message)?;
            encoder.encode_field(&v.approval.as_ref().map(|a| a.message.clone()))?;
            encoder.encode_field(&v.admin.as_ref().map(|a| a.name.clone()))?;
            encoder.encode_field(&v.request.created_at)?;
            encoder.encode_field(&v.request.updated_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn intervals_response(place_id: ulid::Ulid, spans: &[Span]) -> PgWireResult<Response> {
    let schema = Arc::new(intervals_schema());
    let pid = place_id.to_string();
    let rows: Vec<PgWireResult<_>> = spans
        .iter()
        .map(|span| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&pid)?;
            encoder.encode_field(&span.start)?;
            encoder.encode_field(&span.end)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn slots_response(slots: &[SlotRow]) -> PgWireResult<Response> {
    let schema = Arc::new(slots_schema());
    let rows: Vec<PgWireResult<_>> = slots
        .iter()
        .map(|slot| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&slot.day.to_string())?;
            encoder.encode_field(&slot.span.start)?;
            encoder.encode_field(&slot.span.end)?;
            encoder.encode_field(&slot.disabled)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// The table a SELECT reads from, lowercased.
fn select_table(sql: &str) -> Option<String> {
    let lower = sql.to_lowercase();
    let mut words = lower.split_whitespace();
    if words.next()? != "select" {
        return None;
    }
    words.by_ref().find(|w| *w == "from")?;
    let table = words.next()?;
    Some(table.trim_matches(|c| c == ';' || c == '"').to_string())
}

fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match select_table(sql).as_deref() {
        Some("places") => places_schema(),
        Some("admins") => admins_schema(),
        Some("photos") => photos_schema(),
        Some("requests") => requests_schema(),
        Some("approved_intervals") => intervals_schema(),
        Some("slots") => slots_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for BookerHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BookerQueryParser;

#[async_trait]
impl QueryParser for BookerQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BookerHandler {
    type Statement = String;
    type QueryParser = BookerQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run(client, &sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Byte ranges of the `$N` placeholders in `sql` with their numbers.
/// Quoted literals and identifiers are skipped.
fn placeholders(sql: &str) -> Vec<(usize, Range<usize>)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // A doubled quote stays inside the literal.
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((n, start..i));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(n, _)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text
/// format) in one pass, so bound text is never scanned again.
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

fn bind_params<B: AsRef<[u8]>>(sql: &str, parameters: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (n, range) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| parameters.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = range.end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BookerFactory {
    handler: Arc<BookerHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<BookerAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BookerFactory {
    /// Handlers for one connection; the startup handler tells the query
    /// handler whether the session is an admin.
    pub fn new(tenant_manager: Arc<TenantManager>, password: String, admin_password: String) -> Self {
        let admin_login = Arc::new(AtomicBool::new(false));
        let auth_source = BookerAuthSource::new(
            tenant_manager.clone(),
            password,
            admin_password,
            admin_login.clone(),
        );
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BookerHandler::new(tenant_manager, admin_login)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BookerFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    admin_password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(BookerFactory::new(tenant_manager, password, admin_password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for an engine error.
fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::Validation(_) => "22023",
        EngineError::Overlap { .. } => "23P01",
        EngineError::AlreadyExists(_) | EngineError::LimitExceeded(_) | EngineError::WalError(_) => {
            "P0001"
        }
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    debug!("engine error: {e}");
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
