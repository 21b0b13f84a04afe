// Parameter binding shared by the sqlx drivers.

use sqlx::database::HasArguments;
use sqlx::query::Query;
use sqlx::{Database, Encode, Type};

use crate::statement::Value;

/// Binds every positional parameter onto an sqlx query.
///
/// NULL is bound as a text NULL; engines that infer parameter types from
/// context accept it for any column.
pub(crate) fn bind_values<'q, DB>(
    mut query: Query<'q, DB, <DB as HasArguments<'q>>::Arguments>,
    params: &[Value],
) -> Query<'q, DB, <DB as HasArguments<'q>>::Arguments>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
    Vec<u8>: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
{
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.clone()),
            Value::Bytes(b) => query.bind(b.clone()),
        };
    }
    query
}
