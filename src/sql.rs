use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertPlace {
        id: Ulid,
        name: String,
        map_link: String,
        frame_link: Option<String>,
        description: Option<String>,
    },
    InsertAdmin {
        id: Ulid,
        name: String,
    },
    InsertPhoto {
        id: Ulid,
        place_id: Ulid,
        url: String,
    },
    InsertRequest {
        id: Ulid,
        place_id: Ulid,
        full_name: String,
        phone: String,
        contact_link: String,
        start: Ms,
        end: Ms,
        message: String,
    },
    InsertDecision {
        request_id: Ulid,
        approved: bool,
        message: String,
    },
    SelectPlaces,
    SelectAdmins,
    SelectPhotos {
        place_id: Ulid,
    },
    SelectRequests {
        filter: RequestFilter,
    },
    SelectApprovedIntervals {
        place_id: Ulid,
    },
    SelectSlots {
        place_id: Ulid,
        now: Option<Ms>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFilter {
    All,
    Place(Ulid),
    Id(Ulid),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// One VALUES row, addressed by column name when the INSERT lists its
/// columns and by position otherwise.
struct Row<'a> {
    table: &'static str,
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn get(&self, column: &str, position: usize) -> Option<&'a Expr> {
        if self.columns.is_empty() {
            return self.values.get(position);
        }
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    fn required(&self, column: &'static str, position: usize) -> Result<&'a Expr, SqlError> {
        self.get(column, position)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn string(&self, column: &'static str, position: usize) -> Result<String, SqlError> {
        parse_string(self.required(column, position)?)
    }

    fn optional_string(&self, column: &str, position: usize) -> Result<Option<String>, SqlError> {
        self.get(column, position)
            .map_or(Ok(None), parse_string_or_null)
    }

    fn ulid(&self, column: &'static str, position: usize) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.required(column, position)?)
    }

    fn i64(&self, column: &'static str, position: usize) -> Result<i64, SqlError> {
        parse_i64_expr(self.required(column, position)?)
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();
    if !columns.is_empty() && columns.len() != values.len() {
        return Err(SqlError::Parse(format!(
            "{} columns but {} values",
            columns.len(),
            values.len()
        )));
    }

    let table: &'static str = match table.as_str() {
        "places" => "places",
        "admins" => "admins",
        "photos" => "photos",
        "requests" => "requests",
        "decisions" => "decisions",
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let row = Row {
        table,
        columns,
        values: &values,
    };

    match table {
        "places" => Ok(Command::InsertPlace {
            id: row.ulid("id", 0)?,
            name: row.string("name", 1)?,
            map_link: row.string("map_link", 2)?,
            frame_link: row.optional_string("frame_link", 3)?,
            description: row.optional_string("description", 4)?,
        }),
        "admins" => Ok(Command::InsertAdmin {
            id: row.ulid("id", 0)?,
            name: row.string("name", 1)?,
        }),
        "photos" => Ok(Command::InsertPhoto {
            id: row.ulid("id", 0)?,
            place_id: row.ulid("place_id", 1)?,
            url: row.string("url", 2)?,
        }),
        "requests" => Ok(Command::InsertRequest {
            id: row.ulid("id", 0)?,
            place_id: row.ulid("place_id", 1)?,
            full_name: row.string("full_name", 2)?,
            phone: row.string("phone", 3)?,
            contact_link: row.string("contact_link", 4)?,
            start: row.i64("start", 5)?,
            end: row.i64("end", 6)?,
            message: row.string("message", 7)?,
        }),
        _ => Ok(Command::InsertDecision {
            request_id: row.ulid("request_id", 0)?,
            approved: parse_bool(row.required("approved", 1)?)?,
            message: row.optional_string("message", 2)?.unwrap_or_default(),
        }),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let eq = |col: &str| filters.iter().find(|(c, _)| c == col).map(|(_, e)| e);

    match table.as_str() {
        "places" => Ok(Command::SelectPlaces),
        "admins" => Ok(Command::SelectAdmins),
        "photos" => Ok(Command::SelectPhotos {
            place_id: parse_ulid_expr(eq("place_id").ok_or(SqlError::MissingFilter("place_id"))?)?,
        }),
        "requests" => {
            let filter = if let Some(e) = eq("id") {
                RequestFilter::Id(parse_ulid_expr(e)?)
            } else if let Some(e) = eq("place_id") {
                RequestFilter::Place(parse_ulid_expr(e)?)
            } else {
                RequestFilter::All
            };
            Ok(Command::SelectRequests { filter })
        }
        "approved_intervals" => Ok(Command::SelectApprovedIntervals {
            place_id: parse_ulid_expr(eq("place_id").ok_or(SqlError::MissingFilter("place_id"))?)?,
        }),
        "slots" => Ok(Command::SelectSlots {
            place_id: parse_ulid_expr(eq("place_id").ok_or(SqlError::MissingFilter("place_id"))?)?,
            now: eq("now").map(parse_i64_expr).transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Collect `column = value` terms of an AND chain. Anything else is rejected.
fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, (**right).clone()));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("operator {op}"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: missing column {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const PLACE: &str = "01BX5ZZKBKACTAV9WEVGEMMVRY";

    #[test]
    fn parse_insert_place() {
        let sql = format!(
            "INSERT INTO places (id, name, map_link, frame_link, description) \
             VALUES ('{ID}', 'Concert hall', 'https://maps.example/hall', NULL, 'Big stage')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertPlace {
                id,
                name,
                map_link,
                frame_link,
                description,
            } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(name, "Concert hall");
                assert_eq!(map_link, "https://maps.example/hall");
                assert_eq!(frame_link, None);
                assert_eq!(description.as_deref(), Some("Big stage"));
            }
            cmd => panic!("expected InsertPlace, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_columns_may_be_reordered_or_omitted() {
        let sql = format!(
            "INSERT INTO places (map_link, id, name) VALUES ('https://maps.example/hall', '{ID}', 'Hall')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertPlace {
                name,
                map_link,
                frame_link,
                ..
            } => {
                assert_eq!(name, "Hall");
                assert_eq!(map_link, "https://maps.example/hall");
                assert_eq!(frame_link, None);
            }
            cmd => panic!("expected InsertPlace, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_request() {
        let sql = format!(
            r#"INSERT INTO requests (id, place_id, full_name, phone, contact_link, start, "end", message)
               VALUES ('{ID}', '{PLACE}', 'Ivan Petrov', '+7 (999) 123 45-67', 'https://vk.com/ivan', 1000, 2000, 'Rehearsal for the spring concert')"#
        );
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertRequest {
                id: ID.parse().unwrap(),
                place_id: PLACE.parse().unwrap(),
                full_name: "Ivan Petrov".into(),
                phone: "+7 (999) 123 45-67".into(),
                contact_link: "https://vk.com/ivan".into(),
                start: 1000,
                end: 2000,
                message: "Rehearsal for the spring concert".into(),
            }
        );
    }

    #[test]
    fn parse_photos() {
        let sql = format!(
            "INSERT INTO photos (id, place_id, url) VALUES ('{ID}', '{PLACE}', 'https://cdn.example/hall.jpg')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertPhoto {
                id: ID.parse().unwrap(),
                place_id: PLACE.parse().unwrap(),
                url: "https://cdn.example/hall.jpg".into(),
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM photos WHERE place_id = '{PLACE}'")).unwrap(),
            Command::SelectPhotos {
                place_id: PLACE.parse().unwrap()
            }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM photos"),
            Err(SqlError::MissingFilter("place_id"))
        ));
    }

    #[test]
    fn request_needs_contact_link() {
        let sql = format!(
            r#"INSERT INTO requests (id, place_id, full_name, phone, start, "end", message)
               VALUES ('{ID}', '{PLACE}', 'Ivan Petrov', '89991234567', 1000, 2000, 'Rehearsal for the spring concert')"#
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("requests", "contact_link"))
        ));
    }

    #[test]
    fn parse_insert_decision_with_quoted_bool() {
        let sql = format!("INSERT INTO decisions (request_id, approved) VALUES ('{ID}', 't')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertDecision {
                request_id: ID.parse().unwrap(),
                approved: true,
                message: String::new(),
            }
        );
    }

    #[test]
    fn missing_column_is_reported() {
        let sql = format!("INSERT INTO admins (id) VALUES ('{ID}')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("admins", "name"))
        ));
    }

    #[test]
    fn column_value_count_mismatch() {
        let sql = format!("INSERT INTO admins (id, name) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_requests_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM requests").unwrap(),
            Command::SelectRequests {
                filter: RequestFilter::All
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM requests WHERE place_id = '{PLACE}'")).unwrap(),
            Command::SelectRequests {
                filter: RequestFilter::Place(PLACE.parse().unwrap())
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM requests WHERE id = '{ID}'")).unwrap(),
            Command::SelectRequests {
                filter: RequestFilter::Id(ID.parse().unwrap())
            }
        );
    }

    #[test]
    fn parse_select_slots_with_now() {
        let sql = format!("SELECT * FROM slots WHERE place_id = '{PLACE}' AND now = 1714521600000");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots {
                place_id: PLACE.parse().unwrap(),
                now: Some(1_714_521_600_000),
            }
        );
    }

    #[test]
    fn approved_intervals_need_a_place() {
        assert!(matches!(
            parse_sql("SELECT * FROM approved_intervals"),
            Err(SqlError::MissingFilter("place_id"))
        ));
    }

    #[test]
    fn range_filters_are_unsupported() {
        let sql = format!("SELECT * FROM slots WHERE place_id = '{PLACE}' AND now >= 5");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO bookings (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
