use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use hdebug_contracts::{HDEBUG_REPORT_SCHEMA_VERSION, HDEBUG_TRACE_SCHEMA_VERSION};
use hdebug_core::{
    AbiError, ContextRegistry, DebugConfig, DebugContext, Diagnostic, Handle, HandleAbi,
    LeakedHandle, MemoryUniversal, OpId,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Trace {
    pub schema_version: String,
    pub ops: Vec<TraceOp>,
}

/// A handle named by an earlier `as`, or a raw integer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HandleRef {
    Raw(usize),
    Name(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceOp {
    FromI64 {
        value: i64,
        #[serde(rename = "as", default)]
        bind: Option<String>,
    },
    Dup {
        handle: HandleRef,
        #[serde(rename = "as", default)]
        bind: Option<String>,
    },
    Close {
        handle: HandleRef,
    },
    AsI64 {
        handle: HandleRef,
    },
    Is {
        a: HandleRef,
        b: HandleRef,
    },
    Invoke {
        code: u32,
        #[serde(default)]
        args: Vec<HandleRef>,
        #[serde(rename = "as", default)]
        bind: Option<String>,
    },
    NewGeneration,
    /// Interceptor unwrap, without forwarding.
    RawUnwrap {
        handle: HandleRef,
    },
    /// Interceptor close, without forwarding.
    RawClose {
        handle: HandleRef,
    },
}

impl TraceOp {
    fn name(&self) -> &'static str {
        match self {
            TraceOp::FromI64 { .. } => "from_i64",
            TraceOp::Dup { .. } => "dup",
            TraceOp::Close { .. } => "close",
            TraceOp::AsI64 { .. } => "as_i64",
            TraceOp::Is { .. } => "is",
            TraceOp::Invoke { .. } => "invoke",
            TraceOp::NewGeneration => "new_generation",
            TraceOp::RawUnwrap { .. } => "raw_unwrap",
            TraceOp::RawClose { .. } => "raw_close",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpResult {
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<Handle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is: Option<bool>,
    /// Diagnostic code of the violation this op triggered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl OpResult {
    fn new(op: &'static str) -> Self {
        OpResult {
            op,
            handle: None,
            value: None,
            is: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub schema_version: &'static str,
    pub ok: bool,
    pub ops_total: usize,
    pub results: Vec<OpResult>,
    pub diagnostics: Vec<Diagnostic>,
    pub leaks: Vec<LeakedHandle>,
    pub diagnostics_dropped: u64,
}

pub fn parse_trace(bytes: &[u8]) -> Result<Trace> {
    let trace: Trace = serde_json::from_slice(bytes).context("parse trace JSON")?;
    if trace.schema_version != HDEBUG_TRACE_SCHEMA_VERSION {
        bail!(
            "unsupported trace schema_version {:?} (expected {:?})",
            trace.schema_version,
            HDEBUG_TRACE_SCHEMA_VERSION
        );
    }
    Ok(trace)
}

/// Replays `trace` against a fresh debug context bound to an in-memory
/// universal context.
pub fn replay(trace: &Trace, config: DebugConfig) -> Result<ReplayReport> {
    let registry = ContextRegistry::new(config);
    let universal: Arc<dyn HandleAbi> = Arc::new(MemoryUniversal::new("memory"));
    let dctx = registry.bind(universal).context("bind debug context")?;

    let mut replayer = Replayer {
        dctx: &dctx,
        names: HashMap::new(),
    };
    let mut results = Vec::with_capacity(trace.ops.len());
    for (index, op) in trace.ops.iter().enumerate() {
        tracing::debug!(index, op = op.name(), "replay");
        let res = replayer
            .step(op)
            .with_context(|| format!("op {index} ({})", op.name()))?;
        results.push(res);
    }

    let leaks = dctx.leak_report().leaks;
    let diagnostics = dctx.take_diagnostics();
    let diagnostics_dropped = dctx.diagnostics_dropped();
    let ok = diagnostics.is_empty() && diagnostics_dropped == 0 && leaks.is_empty();
    tracing::info!(
        ops = trace.ops.len(),
        diagnostics = diagnostics.len(),
        leaks = leaks.len(),
        "replay finished"
    );
    Ok(ReplayReport {
        schema_version: HDEBUG_REPORT_SCHEMA_VERSION,
        ok,
        ops_total: trace.ops.len(),
        results,
        diagnostics,
        leaks,
        diagnostics_dropped,
    })
}

struct Replayer<'a> {
    dctx: &'a DebugContext,
    names: HashMap<String, Handle>,
}

impl Replayer<'_> {
    fn resolve(&self, r: &HandleRef) -> Result<Handle> {
        match r {
            HandleRef::Raw(raw) => Ok(Handle(*raw)),
            HandleRef::Name(name) => match self.names.get(name) {
                Some(&h) => Ok(h),
                None => bail!("unknown handle name {name:?}"),
            },
        }
    }

    fn bind_name(&mut self, bind: &Option<String>, h: Handle) {
        if let Some(name) = bind {
            self.names.insert(name.clone(), h);
        }
    }

    fn step(&mut self, op: &TraceOp) -> Result<OpResult> {
        let mut res = OpResult::new(op.name());
        match op {
            TraceOp::FromI64 { value, bind } => {
                match settle(self.dctx.from_i64(*value))? {
                    Ok(h) => {
                        self.bind_name(bind, h);
                        res.handle = Some(h);
                    }
                    Err(diag) => res.error = Some(diag),
                }
            }
            TraceOp::Dup { handle, bind } => {
                let h = self.resolve(handle)?;
                match settle(self.dctx.dup(h))? {
                    Ok(d) => {
                        self.bind_name(bind, d);
                        res.handle = Some(d);
                    }
                    Err(diag) => res.error = Some(diag),
                }
            }
            TraceOp::Close { handle } => {
                let h = self.resolve(handle)?;
                res.error = settle(self.dctx.close(h))?.err();
            }
            TraceOp::AsI64 { handle } => {
                let h = self.resolve(handle)?;
                match settle(self.dctx.as_i64(h))? {
                    Ok(v) => res.value = Some(v),
                    Err(diag) => res.error = Some(diag),
                }
            }
            TraceOp::Is { a, b } => {
                let (a, b) = (self.resolve(a)?, self.resolve(b)?);
                match settle(self.dctx.is(a, b))? {
                    Ok(v) => res.is = Some(v),
                    Err(diag) => res.error = Some(diag),
                }
            }
            TraceOp::Invoke { code, args, bind } => {
                let args = args
                    .iter()
                    .map(|a| self.resolve(a))
                    .collect::<Result<Vec<_>>>()?;
                match settle(self.dctx.invoke(OpId(*code), &args))? {
                    Ok(h) => {
                        self.bind_name(bind, h);
                        res.handle = Some(h);
                    }
                    Err(diag) => res.error = Some(diag),
                }
            }
            TraceOp::NewGeneration => {
                res.value = Some(self.dctx.new_generation() as i64);
            }
            TraceOp::RawUnwrap { handle } => {
                let h = self.resolve(handle)?;
                match self.dctx.unwrap_handle(h) {
                    Ok(u) => res.handle = Some(u),
                    Err(e) => res.error = Some(e.code().code_str()),
                }
            }
            TraceOp::RawClose { handle } => {
                let h = self.resolve(handle)?;
                if let Err(e) = self.dctx.close_handle(h) {
                    res.error = Some(e.code().code_str());
                }
            }
        }
        Ok(res)
    }
}

/// Splits handle violations, which the report records, from failures of the
/// universal context itself, which abort the replay.
fn settle<T>(r: Result<T, AbiError>) -> Result<Result<T, &'static str>> {
    match r {
        Ok(v) => Ok(Ok(v)),
        Err(AbiError::Handle(e)) => Ok(Err(e.code().code_str())),
        Err(e) => Err(e.into()),
    }
}
