//! Descriptor → network graph + provenance map.
//!
//! The same builder realizes the dense network (nominal widths) and the
//! pruned network (mask popcounts); only the [`WidthPolicy`] differs.
//! Realized output widths and origins are threaded through the walk as
//! explicit per-entry lists, so a source that has not been realized yet is
//! reported instead of silently read.

use super::provenance::{Provenance, ProvenanceMap};
use super::{ConvBn, ConvRole, HeadConv, Layer, Network, Unit};
use crate::error::{PruneError, Result};
use crate::pruning::MaskDictionary;
use crate::topology::{Anchors, LayerKind, TopologyDescriptor, TopologyEntry};
use tracing::debug;

/// Decides the realized output width of each normalization layer.
pub trait WidthPolicy {
    /// Output width of `norm_id`, whose dense width is `nominal`.
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::MissingMask`] if the policy has no entry.
    fn out_channels(&self, norm_id: &str, nominal: usize) -> Result<usize>;
}

/// Nominal (unpruned) widths.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseWidths;

impl WidthPolicy for DenseWidths {
    fn out_channels(&self, _norm_id: &str, nominal: usize) -> Result<usize> {
        Ok(nominal)
    }
}

impl WidthPolicy for MaskDictionary {
    fn out_channels(&self, norm_id: &str, _nominal: usize) -> Result<usize> {
        self.get(norm_id)
            .map(|mask| mask.count())
            .ok_or_else(|| PruneError::MissingMask {
                layer: norm_id.to_string(),
            })
    }
}

/// Where a realized layer's output channels come from.
#[derive(Debug, Clone, PartialEq)]
enum Origin {
    /// The raw image.
    Input,
    /// One normalization layer.
    Norm(String),
    /// Ordered concatenation of normalization layers.
    Concat(Vec<String>),
    /// Output of a detection head; nothing may consume it.
    Head,
}

/// A resolved source: realized width and origin.
#[derive(Debug, Clone)]
struct Source {
    index: Option<usize>,
    width: usize,
    origin: Origin,
}

/// Output of realizing one entry.
struct Step {
    out_channels: usize,
    origin: Origin,
    units: Vec<Unit>,
    links: Vec<(String, Provenance)>,
    repeat: usize,
    residual: bool,
}

impl Step {
    fn new(out_channels: usize, origin: Origin) -> Self {
        Self {
            out_channels,
            origin,
            units: Vec::new(),
            links: Vec::new(),
            repeat: 1,
            residual: false,
        }
    }

    fn conv(&mut self, id: String, c_in: usize, c_out: usize, kernel: usize, role: ConvRole) {
        self.units.push(Unit::ConvBn(ConvBn {
            id,
            c_in,
            c_out,
            kernel,
            role,
        }));
    }
}

struct EntryContext<'a, W: ?Sized> {
    desc: &'a TopologyDescriptor,
    widths: &'a W,
    index: usize,
    base: String,
}

impl<W: WidthPolicy + ?Sized> EntryContext<'_, W> {
    fn width(&self, norm_id: &str, nominal: usize) -> Result<usize> {
        let width = self.widths.out_channels(norm_id, nominal)?;
        debug!(layer = norm_id, nominal, width, "realized width");
        Ok(width)
    }

    fn invalid(&self, message: impl Into<String>) -> PruneError {
        PruneError::InvalidEntry {
            index: self.index,
            message: message.into(),
        }
    }

    /// Provenance of a unit reading `origin`; `None` for the raw image.
    fn link(&self, origin: &Origin) -> Result<Option<Provenance>> {
        match origin {
            Origin::Input => Ok(None),
            Origin::Norm(norm) => Ok(Some(Provenance::Single(norm.clone()))),
            Origin::Concat(norms) => Ok(Some(Provenance::Concat(norms.clone()))),
            Origin::Head => Err(self.invalid("cannot consume the output of a detection head")),
        }
    }

    fn single<'s>(&self, sources: &'s [Source]) -> Result<&'s Source> {
        match sources {
            [only] => Ok(only),
            _ => Err(self.invalid(format!(
                "expects exactly one source, got {}",
                sources.len()
            ))),
        }
    }
}

/// Realize `desc` under `widths`.
///
/// Returns the network graph and the provenance of every unit that reads
/// channels produced by a normalization layer.
///
/// # Errors
///
/// Returns a topology error for forward or out-of-range source references,
/// multi-source references on single-input kinds, a head that is not the
/// last entry, or a normalization layer the width policy does not know.
pub fn build<W: WidthPolicy + ?Sized>(
    desc: &TopologyDescriptor,
    widths: &W,
) -> Result<(Network, ProvenanceMap)> {
    let mut channels: Vec<usize> = Vec::with_capacity(desc.len());
    let mut origins: Vec<Origin> = Vec::with_capacity(desc.len());
    let mut layers = Vec::with_capacity(desc.len());
    let mut provenance = ProvenanceMap::new();

    for (index, entry) in desc.entries.iter().enumerate() {
        if entry.kind.is_head() && index + 1 != desc.len() {
            return Err(PruneError::InvalidEntry {
                index,
                message: format!("{} must be the last entry", entry.kind.name()),
            });
        }
        let sources = resolve_sources(desc, index, entry, &channels, &origins)?;
        let ctx = EntryContext {
            desc,
            widths,
            index,
            base: format!("model.{index}"),
        };

        let repeat = desc.depth(entry.repeat);
        if repeat > 1 && !matches!(entry.kind, LayerKind::C3 { .. }) {
            return Err(ctx.invalid(format!(
                "{} cannot be repeated ({repeat} copies)",
                entry.kind.name()
            )));
        }

        let step = match &entry.kind {
            LayerKind::Conv { c2, kernel, .. } => conv(&ctx, &sources, *c2, *kernel)?,
            LayerKind::C3 { c2, shortcut } => c3(&ctx, &sources, *c2, *shortcut, repeat)?,
            LayerKind::Sppf { c2, .. } => sppf(&ctx, &sources, *c2)?,
            LayerKind::Upsample { .. } => {
                let src = ctx.single(&sources)?;
                Step::new(src.width, src.origin.clone())
            }
            LayerKind::Concat { .. } => concat(&ctx, &sources)?,
            LayerKind::Detect { nc, anchors } => head(&ctx, &sources, *nc + 5, anchors)?,
            LayerKind::Segment {
                nc,
                anchors,
                nm,
                npr,
            } => {
                let mut step = head(&ctx, &sources, *nc + 5 + *nm, anchors)?;
                proto(&ctx, &sources, &mut step, *nm, desc.width(*npr))?;
                step
            }
        };

        channels.push(step.out_channels);
        origins.push(step.origin);
        for (layer, entry_provenance) in step.links {
            provenance.insert(layer, entry_provenance);
        }
        layers.push(Layer {
            index,
            sources: sources.iter().filter_map(|s| s.index).collect(),
            kind: entry.kind.clone(),
            repeat: step.repeat,
            out_channels: step.out_channels,
            units: step.units,
            residual: step.residual,
        });
    }

    Ok((Network::new(layers), provenance))
}

fn resolve_sources(
    desc: &TopologyDescriptor,
    index: usize,
    entry: &TopologyEntry,
    channels: &[usize],
    origins: &[Origin],
) -> Result<Vec<Source>> {
    if entry.from.is_empty() {
        return Err(PruneError::InvalidEntry {
            index,
            message: "no source reference".to_string(),
        });
    }
    entry
        .from
        .refs()
        .into_iter()
        .map(|source_ref| {
            if index == 0 && source_ref == -1 {
                return Ok(Source {
                    index: None,
                    width: desc.input_channels,
                    origin: Origin::Input,
                });
            }
            let resolved = if source_ref < 0 {
                index as i64 + source_ref
            } else {
                source_ref
            };
            let slot = usize::try_from(resolved)
                .ok()
                .filter(|&i| i < channels.len() && i < index)
                .ok_or(PruneError::ForwardReference { index, source_ref })?;
            Ok(Source {
                index: Some(slot),
                width: channels[slot],
                origin: origins[slot].clone(),
            })
        })
        .collect()
}

fn conv<W: WidthPolicy + ?Sized>(
    ctx: &EntryContext<'_, W>,
    sources: &[Source],
    c2: usize,
    kernel: usize,
) -> Result<Step> {
    let src = ctx.single(sources)?;
    let norm = format!("{}.bn", ctx.base);
    let c_out = ctx.width(&norm, ctx.desc.width(c2))?;

    let mut step = Step::new(c_out, Origin::Norm(norm.clone()));
    step.conv(ctx.base.clone(), src.width, c_out, kernel, ConvRole::Plain);
    if let Some(p) = ctx.link(&src.origin)? {
        step.links.push((norm, p));
    }
    Ok(step)
}

fn c3<W: WidthPolicy + ?Sized>(
    ctx: &EntryContext<'_, W>,
    sources: &[Source],
    c2: usize,
    shortcut: bool,
    depth: usize,
) -> Result<Step> {
    let src = ctx.single(sources)?;
    let c2 = ctx.desc.width(c2);
    let hidden = c2 / 2;
    let base = &ctx.base;

    let cv1_norm = format!("{base}.cv1.bn");
    let cv2_norm = format!("{base}.cv2.bn");
    let cv3_norm = format!("{base}.cv3.bn");
    let cv1 = ctx.width(&cv1_norm, hidden)?;
    let cv2 = ctx.width(&cv2_norm, hidden)?;

    let mut bottlenecks = Step::new(0, Origin::Input);
    let mut residual = shortcut;
    let (mut prev_norm, mut prev_width) = (cv1_norm.clone(), cv1);
    for j in 0..depth {
        let reduce_id = format!("{base}.m.{j}.cv1");
        let expand_id = format!("{base}.m.{j}.cv2");
        let reduce_norm = format!("{reduce_id}.bn");
        let expand_norm = format!("{expand_id}.bn");
        let reduce = ctx.width(&reduce_norm, hidden)?;
        let expand = ctx.width(&expand_norm, hidden)?;

        residual &= prev_width == expand;
        bottlenecks.conv(reduce_id, prev_width, reduce, 1, ConvRole::BottleneckReduce);
        bottlenecks.conv(expand_id, reduce, expand, 3, ConvRole::BottleneckExpand);
        bottlenecks
            .links
            .push((reduce_norm.clone(), Provenance::Single(prev_norm)));
        bottlenecks
            .links
            .push((expand_norm.clone(), Provenance::Single(reduce_norm)));
        prev_norm = expand_norm;
        prev_width = expand;
    }

    let cv3 = ctx.width(&cv3_norm, c2)?;
    let mut step = Step::new(cv3, Origin::Norm(cv3_norm.clone()));
    step.conv(format!("{base}.cv1"), src.width, cv1, 1, ConvRole::CspEntry);
    step.conv(format!("{base}.cv2"), src.width, cv2, 1, ConvRole::CspSide);
    step.conv(
        format!("{base}.cv3"),
        prev_width + cv2,
        cv3,
        1,
        ConvRole::CspExit,
    );
    if let Some(p) = ctx.link(&src.origin)? {
        step.links.push((cv1_norm, p.clone()));
        step.links.push((cv2_norm.clone(), p));
    }
    step.links
        .push((cv3_norm, Provenance::Concat(vec![prev_norm, cv2_norm])));
    step.units.extend(bottlenecks.units);
    step.links.extend(bottlenecks.links);
    step.repeat = depth;
    step.residual = residual && depth > 0;
    Ok(step)
}

fn sppf<W: WidthPolicy + ?Sized>(
    ctx: &EntryContext<'_, W>,
    sources: &[Source],
    c2: usize,
) -> Result<Step> {
    let src = ctx.single(sources)?;
    let base = &ctx.base;
    let cv1_norm = format!("{base}.cv1.bn");
    let cv2_norm = format!("{base}.cv2.bn");

    let cv1 = ctx.width(&cv1_norm, src.width / 2)?;
    let cv2 = ctx.width(&cv2_norm, ctx.desc.width(c2))?;

    let mut step = Step::new(cv2, Origin::Norm(cv2_norm.clone()));
    step.conv(format!("{base}.cv1"), src.width, cv1, 1, ConvRole::PoolEntry);
    step.conv(format!("{base}.cv2"), cv1 * 4, cv2, 1, ConvRole::PoolExit);
    if let Some(p) = ctx.link(&src.origin)? {
        step.links.push((cv1_norm.clone(), p));
    }
    step.links.push((
        cv2_norm,
        Provenance::Repeated {
            source: cv1_norm,
            copies: 4,
        },
    ));
    Ok(step)
}

fn concat<W: WidthPolicy + ?Sized>(ctx: &EntryContext<'_, W>, sources: &[Source]) -> Result<Step> {
    let mut norms = Vec::new();
    for src in sources {
        match &src.origin {
            Origin::Norm(norm) => norms.push(norm.clone()),
            Origin::Concat(list) => norms.extend(list.iter().cloned()),
            Origin::Input => return Err(ctx.invalid("cannot concatenate the raw image")),
            Origin::Head => return Err(ctx.invalid("cannot consume the output of a detection head")),
        }
    }
    let width = sources.iter().map(|s| s.width).sum();
    Ok(Step::new(width, Origin::Concat(norms)))
}

fn head<W: WidthPolicy + ?Sized>(
    ctx: &EntryContext<'_, W>,
    sources: &[Source],
    outputs_per_anchor: usize,
    anchors: &Anchors,
) -> Result<Step> {
    if sources.len() != anchors.num_scales() {
        return Err(ctx.invalid(format!(
            "{} head inputs for {} anchor scales",
            sources.len(),
            anchors.num_scales()
        )));
    }
    let na = anchors.per_scale_count();
    let mut step = Step::new(0, Origin::Head);
    for (k, src) in sources.iter().enumerate() {
        let id = format!("{}.m.{k}", ctx.base);
        let p = ctx
            .link(&src.origin)?
            .ok_or_else(|| ctx.invalid("head cannot read the raw image"))?;
        step.units.push(Unit::HeadConv(HeadConv {
            id: id.clone(),
            c_in: src.width,
            c_out: na * outputs_per_anchor,
        }));
        step.links.push((id, p));
    }
    step.units.push(Unit::Buffer {
        name: format!("{}.anchors", ctx.base),
        shape: vec![anchors.num_scales(), na, 2],
    });
    Ok(step)
}

fn proto<W: WidthPolicy + ?Sized>(
    ctx: &EntryContext<'_, W>,
    sources: &[Source],
    step: &mut Step,
    nm: usize,
    npr: usize,
) -> Result<()> {
    let src = sources
        .first()
        .ok_or_else(|| ctx.invalid("segmentation head needs at least one source"))?;
    let base = format!("{}.proto", ctx.base);
    let norms: Vec<String> = (1..=3).map(|i| format!("{base}.cv{i}.bn")).collect();

    let cv1 = ctx.width(&norms[0], npr)?;
    let cv2 = ctx.width(&norms[1], npr)?;
    let cv3 = ctx.width(&norms[2], nm)?;
    step.conv(format!("{base}.cv1"), src.width, cv1, 3, ConvRole::Proto);
    step.conv(format!("{base}.cv2"), cv1, cv2, 3, ConvRole::Proto);
    step.conv(format!("{base}.cv3"), cv2, cv3, 1, ConvRole::Proto);

    if let Some(p) = ctx.link(&src.origin)? {
        step.links.push((norms[0].clone(), p));
    }
    step.links
        .push((norms[1].clone(), Provenance::Single(norms[0].clone())));
    step.links
        .push((norms[2].clone(), Provenance::Single(norms[1].clone())));
    Ok(())
}
