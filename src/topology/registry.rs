//! Closed registry mapping module names to argument constructors.
//!
//! Descriptor strings are never evaluated: each accepted name maps to a
//! function that validates the raw arguments and produces a [`LayerKind`].
//! Adding a kind means adding a row here and a branch in the builder.

use super::{AnchorSpec, Anchors, LayerKind};
use crate::error::{PruneError, Result};
use serde_json::Value;

/// Model-level values an argument list may refer to by name.
pub(crate) struct Context<'a> {
    pub index: usize,
    pub nc: usize,
    pub anchors: &'a AnchorSpec,
    pub num_sources: usize,
}

pub(crate) type Constructor = fn(&[Value], &Context<'_>) -> Result<LayerKind>;

const REGISTRY: &[(&str, Constructor)] = &[
    ("Conv", conv),
    ("C3", c3),
    ("C3Pruned", c3),
    ("SPPF", sppf),
    ("SPPFPruned", sppf),
    ("nn.Upsample", upsample),
    ("Upsample", upsample),
    ("Concat", concat),
    ("Detect", detect),
    ("Segment", segment),
];

/// Look up the constructor for a module name.
pub(crate) fn resolve(name: &str) -> Option<Constructor> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, ctor)| *ctor)
}

fn invalid(ctx: &Context<'_>, message: String) -> PruneError {
    PruneError::InvalidEntry {
        index: ctx.index,
        message,
    }
}

/// Positional integer argument; the string `"nc"` resolves to the class count.
fn usize_arg(args: &[Value], pos: usize, default: Option<usize>, ctx: &Context<'_>) -> Result<usize> {
    match args.get(pos) {
        None | Some(Value::Null) => {
            default.ok_or_else(|| invalid(ctx, format!("missing integer argument {pos}")))
        }
        Some(Value::Number(n)) => {
            let v = n
                .as_u64()
                .ok_or_else(|| invalid(ctx, format!("argument {pos} must be a non-negative integer")))?;
            usize::try_from(v)
                .map_err(|_| invalid(ctx, format!("argument {pos} ({v}) does not fit in usize")))
        }
        Some(Value::String(s)) if s == "nc" => Ok(ctx.nc),
        Some(other) => Err(invalid(
            ctx,
            format!("argument {pos} must be an integer, got {other}"),
        )),
    }
}

fn bool_arg(args: &[Value], pos: usize, default: bool, ctx: &Context<'_>) -> Result<bool> {
    match args.get(pos) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(invalid(
            ctx,
            format!("argument {pos} must be a boolean, got {other}"),
        )),
    }
}

fn anchors_arg(args: &[Value], pos: usize, ctx: &Context<'_>) -> Result<Anchors> {
    let spec = match args.get(pos) {
        Some(Value::String(s)) if s == "anchors" => ctx.anchors.clone(),
        Some(value @ (Value::Array(_) | Value::Number(_))) => {
            serde_json::from_value::<AnchorSpec>(value.clone())
                .map_err(|e| invalid(ctx, format!("invalid anchors: {e}")))?
        }
        Some(other) => return Err(invalid(ctx, format!("invalid anchors argument {other}"))),
        None => return Err(invalid(ctx, "missing anchors argument".to_string())),
    };
    let anchors = match spec {
        AnchorSpec::Boxes(boxes) => Anchors::new(boxes).map_err(|e| invalid(ctx, e))?,
        AnchorSpec::Count(count) => {
            if count == 0 {
                return Err(invalid(ctx, "anchor count must be at least 1".to_string()));
            }
            Anchors::placeholder(count, ctx.num_sources)
        }
    };
    if anchors.num_scales() != ctx.num_sources {
        return Err(invalid(
            ctx,
            format!(
                "{} anchor scales for {} head inputs",
                anchors.num_scales(),
                ctx.num_sources
            ),
        ));
    }
    Ok(anchors)
}

fn conv(args: &[Value], ctx: &Context<'_>) -> Result<LayerKind> {
    let c2 = usize_arg(args, 0, None, ctx)?;
    let kernel = usize_arg(args, 1, Some(1), ctx)?;
    let stride = usize_arg(args, 2, Some(1), ctx)?;
    if kernel == 0 || stride == 0 {
        return Err(invalid(ctx, "kernel and stride must be positive".to_string()));
    }
    Ok(LayerKind::Conv { c2, kernel, stride })
}

fn c3(args: &[Value], ctx: &Context<'_>) -> Result<LayerKind> {
    Ok(LayerKind::C3 {
        c2: usize_arg(args, 0, None, ctx)?,
        shortcut: bool_arg(args, 1, true, ctx)?,
    })
}

fn sppf(args: &[Value], ctx: &Context<'_>) -> Result<LayerKind> {
    Ok(LayerKind::Sppf {
        c2: usize_arg(args, 0, None, ctx)?,
        kernel: usize_arg(args, 1, Some(5), ctx)?,
    })
}

fn upsample(args: &[Value], ctx: &Context<'_>) -> Result<LayerKind> {
    // [size, scale_factor, mode]; only nearest mode is part of the vocabulary.
    if let Some(mode) = args.get(2) {
        if mode.as_str() != Some("nearest") {
            return Err(invalid(ctx, format!("unsupported upsample mode {mode}")));
        }
    }
    Ok(LayerKind::Upsample {
        scale: usize_arg(args, 1, Some(2), ctx)?,
    })
}

fn concat(args: &[Value], ctx: &Context<'_>) -> Result<LayerKind> {
    let dim = usize_arg(args, 0, Some(1), ctx)?;
    if dim != 1 {
        return Err(invalid(
            ctx,
            format!("only channel concatenation (dim 1) is supported, got {dim}"),
        ));
    }
    Ok(LayerKind::Concat { dim })
}

fn detect(args: &[Value], ctx: &Context<'_>) -> Result<LayerKind> {
    Ok(LayerKind::Detect {
        nc: usize_arg(args, 0, Some(ctx.nc), ctx)?,
        anchors: anchors_arg(args, 1, ctx)?,
    })
}

fn segment(args: &[Value], ctx: &Context<'_>) -> Result<LayerKind> {
    Ok(LayerKind::Segment {
        nc: usize_arg(args, 0, Some(ctx.nc), ctx)?,
        anchors: anchors_arg(args, 1, ctx)?,
        nm: usize_arg(args, 2, Some(32), ctx)?,
        npr: usize_arg(args, 3, Some(256), ctx)?,
    })
}
