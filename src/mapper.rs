//! Response mapping onto registered shapes
//!
//! A shape is an explicit descriptor of how to build a typed value from a
//! JSON object. Two strategies are supported, tried in this order:
//!
//! 1. Constructor: named parameters (required or defaulted) are resolved
//!    from the data and handed to a constructor closure.
//! 2. Field assignment: a default instance is created and every data key
//!    with a registered setter is applied; anything else is ignored.
//!
//! ```
//! use ada_n8n_client::mapper::{ResponseMapper, ResponseShape};
//! use serde_json::json;
//!
//! struct Verdict { allowed: bool, reason: String }
//!
//! let mapper = ResponseMapper::new();
//! mapper.register(
//!     ResponseShape::builder::<Verdict>("verdict")
//!         .required("allowed")
//!         .optional("reason", json!(""))
//!         .construct_with(|args| Ok(Verdict { allowed: args.get("allowed")?, reason: args.get("reason")? }))
//!         .build(),
//! );
//!
//! let mapped = mapper.map_to(&json!({"allowed": true}), "verdict").unwrap();
//! assert!(mapped.downcast_ref::<Verdict>().unwrap().allowed);
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::MappingError;

pub type MapResult<T> = std::result::Result<T, MappingError>;
type MapFn = dyn Fn(&Map<String, Value>) -> MapResult<Arc<dyn Any + Send + Sync>> + Send + Sync;
type Constructor<T> = Box<dyn Fn(&ShapeArgs) -> MapResult<T> + Send + Sync>;
type Setter<T> = Box<dyn Fn(&mut T, &Value) -> MapResult<()> + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════
// Mapped Response
// ═══════════════════════════════════════════════════════════════════════════

/// Typed projection of response data produced by a shape.
#[derive(Clone)]
pub struct MappedResponse {
    shape_id: String,
    value: Arc<dyn Any + Send + Sync>,
}

impl MappedResponse {
    pub fn shape_id(&self) -> &str {
        &self.shape_id
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for MappedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedResponse")
            .field("shape_id", &self.shape_id)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Shape Descriptors
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Param {
    name: String,
    default: Option<Value>,
}

/// Resolved constructor arguments for one mapping call.
#[derive(Debug)]
pub struct ShapeArgs {
    shape: String,
    values: Map<String, Value>,
}

impl ShapeArgs {
    /// Deserialize a declared parameter.
    pub fn get<V: DeserializeOwned>(&self, name: &str) -> MapResult<V> {
        let value = self.values.get(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| MappingError::InvalidField {
            shape: self.shape.clone(),
            field: name.to_string(),
            message: e.to_string(),
        })
    }
}

/// Type-erased, registered mapping target.
pub struct ResponseShape {
    id: String,
    map: Box<MapFn>,
}

impl ResponseShape {
    pub fn builder<T>(id: impl Into<String>) -> ShapeBuilder<T>
    where
        T: Send + Sync + 'static,
    {
        ShapeBuilder {
            id: id.into(),
            params: Vec::new(),
            constructor: None,
            factory: None,
            setters: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for ResponseShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseShape").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Builder for a [`ResponseShape`] targeting `T`.
pub struct ShapeBuilder<T> {
    id: String,
    params: Vec<Param>,
    constructor: Option<Constructor<T>>,
    factory: Option<Box<dyn Fn() -> T + Send + Sync>>,
    setters: HashMap<String, Setter<T>>,
}

impl<T> ShapeBuilder<T>
where
    T: Send + Sync + 'static,
{
    /// Constructor parameter that must be present and non-null in the data.
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Constructor parameter that falls back to `default` when absent.
    pub fn optional(mut self, name: impl Into<String>, default: Value) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default),
        });
        self
    }

    pub fn construct_with<F>(mut self, constructor: F) -> Self
    where
        F: Fn(&ShapeArgs) -> MapResult<T> + Send + Sync + 'static,
    {
        self.constructor = Some(Box::new(constructor));
        self
    }

    /// Factory for the field-assignment strategy.
    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Writable field for the field-assignment strategy.
    pub fn field<V, F>(mut self, name: impl Into<String>, setter: F) -> Self
    where
        V: DeserializeOwned,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let name = name.into();
        let shape = self.id.clone();
        let field = name.clone();
        self.setters.insert(
            name,
            Box::new(move |target: &mut T, value: &Value| {
                let value: V = serde_json::from_value(value.clone()).map_err(|e| {
                    MappingError::InvalidField {
                        shape: shape.clone(),
                        field: field.clone(),
                        message: e.to_string(),
                    }
                })?;
                setter(target, value);
                Ok(())
            }),
        );
        self
    }

    pub fn build(self) -> ResponseShape {
        let ShapeBuilder {
            id,
            params,
            constructor,
            factory,
            setters,
        } = self;

        let shape = id.clone();
        let has_required = params.iter().any(|p| p.default.is_none());

        let map = move |data: &Map<String, Value>| -> MapResult<Arc<dyn Any + Send + Sync>> {
            match (&constructor, &factory) {
                (Some(construct), None) => {
                    let args = resolve_args(&shape, &params, data)?;
                    Ok(Arc::new(construct(&args)?))
                }
                (Some(construct), Some(_)) if has_required => {
                    let args = resolve_args(&shape, &params, data)?;
                    Ok(Arc::new(construct(&args)?))
                }
                (_, Some(create)) => {
                    let mut instance = create();
                    for (key, value) in data {
                        let Some(set) = setters.get(key) else {
                            continue;
                        };
                        if let Err(e) = set(&mut instance, value) {
                            trace!(shape = %shape, field = %key, "Skipping unwritable field: {}", e);
                        }
                    }
                    Ok(Arc::new(instance))
                }
                (None, None) => Err(MappingError::Unconstructible(shape.clone())),
            }
        };

        ResponseShape {
            id,
            map: Box::new(map),
        }
    }
}

fn resolve_args(shape: &str, params: &[Param], data: &Map<String, Value>) -> MapResult<ShapeArgs> {
    let mut values = Map::new();

    for param in params {
        let value = match (data.get(&param.name), &param.default) {
            (Some(value), _) if !value.is_null() => value.clone(),
            (_, Some(default)) => default.clone(),
            _ => {
                return Err(MappingError::MissingField {
                    shape: shape.to_string(),
                    field: param.name.clone(),
                });
            }
        };
        values.insert(param.name.clone(), value);
    }

    Ok(ShapeArgs {
        shape: shape.to_string(),
        values,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Response Mapper
// ═══════════════════════════════════════════════════════════════════════════

/// Registry of response shapes.
#[derive(Debug, Default)]
pub struct ResponseMapper {
    shapes: RwLock<HashMap<String, Arc<ResponseShape>>>,
}

impl ResponseMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shape, replacing any previous shape with the same id.
    pub fn register(&self, shape: ResponseShape) {
        self.shapes.write().insert(shape.id.clone(), Arc::new(shape));
    }

    /// Map `data` onto the shape registered as `shape_id`.
    pub fn map_to(&self, data: &Value, shape_id: &str) -> MapResult<MappedResponse> {
        let shape = self
            .shapes
            .read()
            .get(shape_id)
            .cloned()
            .ok_or_else(|| MappingError::UnknownShape(shape_id.to_string()))?;

        let Value::Object(object) = data else {
            return Err(MappingError::InvalidData(data.to_string()));
        };

        let value = (shape.map)(object)?;
        Ok(MappedResponse {
            shape_id: shape.id.clone(),
            value,
        })
    }
}
