//! Recursive validation and coercion of inbound payloads against a
//! handler's declared `Schema` (SPEC_FULL.md §4.1).

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::ValidationError;
use crate::handler::Handler;
use crate::schema::{ArgMap, LeafType, ParamKind};

/// Validate `payload` against `handler`'s schema, recursively resolving any
/// `Depends` parameters, and return the coerced argument map ready to pass
/// to `handler.call`.
///
/// When `on_subscribe` is true, parameters not marked `required_on_subscribe`
/// are skipped entirely — they are neither validated nor present in the
/// returned map (SPEC_FULL.md §3, "RequiredOnSubscribe").
pub fn validate<'a>(
    handler: &'a dyn Handler,
    payload: &'a Value,
    on_subscribe: bool,
) -> Pin<Box<dyn Future<Output = Result<ArgMap, ValidationError>> + Send + 'a>> {
    Box::pin(async move {
        let obj = payload.as_object().ok_or_else(|| {
            ValidationError::new(handler.name(), "payload is not a JSON object")
        })?;

        let mut args = ArgMap::new();
        for param in handler.schema() {
            if on_subscribe && !param.required_on_subscribe {
                continue;
            }

            match &param.kind {
                ParamKind::Depends(dependency) => {
                    let sub_payload = obj
                        .get(&param.name)
                        .cloned()
                        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                    let dep_args = validate(dependency.as_ref(), &sub_payload, on_subscribe)
                        .await
                        .map_err(|_| {
                            ValidationError::new(
                                handler.name(),
                                format!("dependency '{}' rejected its payload", param.name),
                            )
                        })?;
                    let value = dependency.call(dep_args).await.map_err(|e| {
                        ValidationError::new(
                            handler.name(),
                            format!("dependency '{}' failed: {e}", param.name),
                        )
                    })?;
                    args.insert(param.name.clone(), value);
                }
                ParamKind::Leaf(leaf) => {
                    let raw = obj.get(&param.name).ok_or_else(|| {
                        ValidationError::new(
                            handler.name(),
                            format!("missing required field '{}'", param.name),
                        )
                    })?;
                    let coerced = coerce_leaf(handler.name(), &param.name, leaf, raw)?;
                    args.insert(param.name.clone(), coerced);
                }
            }
        }

        Ok(args)
    })
}

/// Coerce a single JSON value against a leaf type.
///
/// Numeric strings are accepted for numeric fields ("5" → 5); every other
/// mismatch is a strict type error. Nested objects recurse field-by-field.
fn coerce_leaf(
    handler_name: &str,
    field: &str,
    leaf: &LeafType,
    raw: &Value,
) -> Result<Value, ValidationError> {
    let mismatch = || {
        ValidationError::new(
            handler_name,
            format!("field '{field}' does not match its declared type"),
        )
    };

    match leaf {
        LeafType::Int => match raw {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw.clone()),
            Value::Number(n) => {
                let f = n.as_f64().ok_or_else(mismatch)?;
                if f.fract() == 0.0 {
                    Ok(Value::from(f as i64))
                } else {
                    Err(mismatch())
                }
            }
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        LeafType::Float => match raw {
            Value::Number(n) => Ok(Value::from(n.as_f64().ok_or_else(mismatch)?)),
            Value::String(s) => s
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        LeafType::Str => match raw {
            Value::String(_) => Ok(raw.clone()),
            _ => Err(mismatch()),
        },
        LeafType::Bool => match raw {
            Value::Bool(_) => Ok(raw.clone()),
            _ => Err(mismatch()),
        },
        LeafType::Any => Ok(raw.clone()),
        LeafType::Object(nested) => {
            let nested_obj = raw.as_object().ok_or_else(mismatch)?;
            let mut out = serde_json::Map::new();
            for param in nested {
                if let ParamKind::Leaf(leaf) = &param.kind {
                    let nested_raw = nested_obj.get(&param.name).ok_or_else(|| {
                        ValidationError::new(
                            handler_name,
                            format!("missing required field '{field}.{}'", param.name),
                        )
                    })?;
                    let coerced = coerce_leaf(handler_name, &param.name, leaf, nested_raw)?;
                    out.insert(param.name.clone(), coerced);
                }
                // Nested `Depends` inside an `Object` leaf is not a real
                // schema shape (dependencies are only ever top-level
                // handler parameters) — skipped rather than treated as an
                // error, matching the spec's silence on the case.
            }
            Ok(Value::Object(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnHandler, HandlerFuture};
    use crate::schema::Param;
    use std::sync::Arc;

    fn ok_handler(name: &str, schema: crate::schema::Schema, ret: Value) -> Arc<dyn Handler> {
        Arc::new(FnHandler::new(name, schema, move |_args| -> HandlerFuture {
            let ret = ret.clone();
            Box::pin(async move { Ok(ret) })
        }))
    }

    #[tokio::test]
    async fn coerces_numeric_string() {
        let handler = ok_handler("simple_action", vec![Param::int("x")], Value::Null);
        let payload = serde_json::json!({"x": "5"});
        let args = validate(handler.as_ref(), &payload, false).await.unwrap();
        assert_eq!(args["x"], serde_json::json!(5));
    }

    #[tokio::test]
    async fn rejects_non_numeric_string() {
        let handler = ok_handler("simple_action", vec![Param::int("x")], Value::Null);
        let payload = serde_json::json!({"x": "not_an_int"});
        let err = validate(handler.as_ref(), &payload, false).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid parameters for action 'simple_action'");
    }

    #[tokio::test]
    async fn required_on_subscribe_gates_plain_params() {
        let schema = vec![Param::str("token").required_on_subscribe(), Param::int("unused")];
        let handler = ok_handler("c", schema, Value::Null);

        let with_token = serde_json::json!({"token": "t"});
        let args = validate(handler.as_ref(), &with_token, true).await.unwrap();
        assert_eq!(args.len(), 1);
        assert_eq!(args["token"], serde_json::json!("t"));

        let missing = serde_json::json!({});
        assert!(validate(handler.as_ref(), &missing, true).await.is_err());

        let wrong_type = serde_json::json!({"token": 12345});
        assert!(validate(handler.as_ref(), &wrong_type, true).await.is_err());
    }

    #[tokio::test]
    async fn nested_dependency_resolves_recursively() {
        let common = ok_handler(
            "common",
            vec![Param::int("a"), Param::str("b")],
            Value::String("dependency result".to_string()),
        );
        let nested: Arc<dyn Handler> = Arc::new(FnHandler::new(
            "nested",
            vec![Param::depends("x", common)],
            |args: ArgMap| -> HandlerFuture {
                Box::pin(async move { Ok(serde_json::json!({ "x": args["x"] })) })
            },
        ));
        let act = ok_handler("act", vec![Param::depends("dep", nested)], Value::Null);

        let payload = serde_json::json!({
            "dep": { "x": { "a": 100, "b": "world" } }
        });
        let args = validate(act.as_ref(), &payload, false).await.unwrap();
        assert_eq!(args["dep"], serde_json::json!({"x": "dependency result"}));
    }
}
