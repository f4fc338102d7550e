//! Actions and the namespace / global helpers.
//!
//! An action is either scoped (subject to namespace prefixing at every
//! subspace boundary) or global (crosses every boundary untouched). The
//! tag is explicit in the type; the `globalAction` field only exists in
//! the serialized form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Field carrying the action type in the serialized form.
pub const TYPE_FIELD: &str = "type";

/// Field carrying the global marker in the serialized form.
pub const GLOBAL_MARKER: &str = "globalAction";

/// Separator between a namespace and the unprefixed action type.
pub const NAMESPACE_SEPARATOR: char = '/';

/// Type string plus every other field of an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionData {
    pub kind: String,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAction", into = "RawAction")]
pub enum Action {
    Scoped(ActionData),
    Global(ActionData),
}

impl Action {
    /// Scoped action with an empty payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Action::Scoped(ActionData {
            kind: kind.into(),
            payload: Map::new(),
        })
    }

    /// Add a payload field. Builder-style, for constructing fresh actions.
    ///
    /// [`TYPE_FIELD`] and [`GLOBAL_MARKER`] are reserved for the tag and
    /// type; use [`with_type`](Self::with_type) or [`global_action`] to
    /// change those. Reserved fields are ignored.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        if field == TYPE_FIELD || field == GLOBAL_MARKER {
            warn!(field = %field, action_type = self.action_type(), "reserved action field ignored");
            return self;
        }
        self.data_mut().payload.insert(field, value.into());
        self
    }

    pub fn action_type(&self) -> &str {
        &self.data().kind
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.data().payload
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data().payload.get(field)
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Action::Global(_))
    }

    pub fn data(&self) -> &ActionData {
        match self {
            Action::Scoped(data) | Action::Global(data) => data,
        }
    }

    /// New action with the same tag and payload but a different type.
    pub fn with_type(&self, kind: impl Into<String>) -> Self {
        let data = ActionData {
            kind: kind.into(),
            payload: self.data().payload.clone(),
        };
        match self {
            Action::Scoped(_) => Action::Scoped(data),
            Action::Global(_) => Action::Global(data),
        }
    }

    fn data_mut(&mut self) -> &mut ActionData {
        match self {
            Action::Scoped(data) | Action::Global(data) => data,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Mark an action global so no subspace boundary rewrites its type.
pub fn global_action(action: Action) -> Action {
    match action {
        Action::Scoped(data) => Action::Global(data),
        global => global,
    }
}

pub fn is_global_action(action: &Action) -> bool {
    action.is_global()
}

/// Prefix a scoped action's type with `"<namespace>/"`. Global actions
/// are returned unchanged.
pub fn namespace_action(namespace: &str, action: Action) -> Action {
    match action {
        Action::Scoped(ActionData { kind, payload }) => Action::Scoped(ActionData {
            kind: format!("{namespace}{NAMESPACE_SEPARATOR}{kind}"),
            payload,
        }),
        global => global,
    }
}

/// Curried form of [`namespace_action`].
pub fn namespaced_action(
    namespace: impl Into<String>,
) -> impl Fn(Action) -> Action + Clone + Send + Sync + 'static {
    let namespace = namespace.into();
    move |action| namespace_action(&namespace, action)
}

/// Inverse of [`namespace_action`].
///
/// Global actions come back unchanged. Scoped actions come back with the
/// prefix removed, or `None` when their type is not under `namespace`.
pub fn strip_namespace(namespace: &str, action: &Action) -> Option<Action> {
    match action {
        Action::Global(_) => Some(action.clone()),
        Action::Scoped(data) => data
            .kind
            .strip_prefix(namespace)
            .and_then(|rest| rest.strip_prefix(NAMESPACE_SEPARATOR))
            .map(|rest| action.with_type(rest)),
    }
}

// ---------------------------------------------------------------------------
// Wire shape: { "type": ..., ...payload, "globalAction": true }
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "globalAction", default, skip_serializing_if = "is_false")]
    global: bool,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl From<RawAction> for Action {
    fn from(raw: RawAction) -> Self {
        let data = ActionData {
            kind: raw.kind,
            payload: raw.payload,
        };
        if raw.global {
            Action::Global(data)
        } else {
            Action::Scoped(data)
        }
    }
}

impl From<Action> for RawAction {
    fn from(action: Action) -> Self {
        let global = action.is_global();
        let ActionData { kind, payload } = match action {
            Action::Scoped(data) | Action::Global(data) => data,
        };
        RawAction {
            kind,
            global,
            payload,
        }
    }
}
