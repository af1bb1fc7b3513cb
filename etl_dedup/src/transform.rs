use etl_core::TransformConfig;
use serde_json::Value;

use crate::expr::{CompiledExpr, ExprError};

struct CompiledTransform {
    expr: CompiledExpr,
    output_name: String,
}

/// Applies an ordered list of record-local expressions that compute new
/// fields from the parsed JSON input (§4.4). Compiled once per pipeline
/// start, reused per record.
pub struct StatelessTransformer {
    transforms: Vec<CompiledTransform>,
}

impl StatelessTransformer {
    pub fn compile(configs: &[TransformConfig]) -> Result<Self, ExprError> {
        let transforms = configs
            .iter()
            .map(|c| {
                Ok(CompiledTransform {
                    expr: CompiledExpr::compile(&c.expression)?,
                    output_name: c.output_name.clone(),
                })
            })
            .collect::<Result<Vec<_>, ExprError>>()?;
        Ok(Self { transforms })
    }

    pub fn empty() -> Self {
        Self { transforms: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Evaluates every configured transform against `payload` and returns
    /// a new payload with the computed fields merged in. On error for any
    /// single transform, the whole record fails (routed to DLQ by the
    /// caller); other records in the batch are unaffected.
    pub fn apply(&self, payload: &Value) -> Result<Value, ExprError> {
        let mut out = payload.clone();
        if !out.is_object() {
            out = Value::Object(serde_json::Map::new());
        }
        for t in &self.transforms {
            let value = t.expr.eval(payload)?;
            out.as_object_mut()
                .expect("ensured object above")
                .insert(t.output_name.clone(), value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn adds_computed_field() {
        let configs = vec![TransformConfig {
            expression: "price * quantity".to_string(),
            output_name: "total".to_string(),
            output_type: "float".to_string(),
        }];
        let t = StatelessTransformer::compile(&configs).unwrap();
        let out = t.apply(&json!({"price": 2, "quantity": 3})).unwrap();
        assert_eq!(out["total"], json!(6.0));
        assert_eq!(out["price"], json!(2));
    }

    #[test]
    fn empty_transformer_is_identity_like() {
        let t = StatelessTransformer::empty();
        let out = t.apply(&json!({"a": 1})).unwrap();
        assert_eq!(out, json!({"a": 1}));
    }

    #[test]
    fn eval_error_surfaces_to_caller() {
        let configs = vec![TransformConfig {
            expression: "price / zero_divisor".to_string(),
            output_name: "bad".to_string(),
            output_type: "float".to_string(),
        }];
        let t = StatelessTransformer::compile(&configs).unwrap();
        assert!(t.apply(&json!({"price": 1, "zero_divisor": 0})).is_err());
    }
}
