// packages/pipeline/src/model/event.rs
//! Captured call record

use crate::model::page::PageContext;
use crate::model::params::{ObjectRef, ParamMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Frames contributed by the interception layer itself
pub const INTERCEPTION_FRAMES: usize = 2;

/// One call-stack frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Function or method name
    pub function: String,

    /// Declaring class, empty for free functions
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub class: String,

    /// Source file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Source line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl StackFrame {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            class: String::new(),
            file: None,
            line: None,
        }
    }

    pub fn in_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }
}

/// One captured call
///
/// Built once by the instrumentation layer and only read afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Request the call happened in
    pub page: Arc<PageContext>,

    /// Wall-clock time of the call
    pub time: DateTime<Utc>,

    /// Class of the call site, empty for free functions
    pub class: String,

    /// Instance the call was made on
    pub object: Option<ObjectRef>,

    /// Called method or function
    pub action: String,

    /// Call arguments
    pub params: ParamMap,

    /// Call stack at capture time
    pub stack_trace: Vec<StackFrame>,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(page: Arc<PageContext>, class: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            page,
            time: Utc::now(),
            class: class.into(),
            object: None,
            action: action.into(),
            params: ParamMap::new(),
            stack_trace: Vec::new(),
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn with_object(mut self, object: ObjectRef) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.params = params;
        self
    }

    /// Store frames verbatim
    pub fn with_stack_trace(mut self, frames: Vec<StackFrame>) -> Self {
        self.stack_trace = frames;
        self
    }

    /// Store a raw capture, dropping the interception layer's own frames
    pub fn with_captured_stack(mut self, frames: Vec<StackFrame>) -> Self {
        self.stack_trace = frames.into_iter().skip(INTERCEPTION_FRAMES).collect();
        self
    }
}
