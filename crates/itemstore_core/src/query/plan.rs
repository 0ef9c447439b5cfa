//! Query plans, access-path selection and execution.
//!
//! # Invariants
//! - A kind source whose predicate bounds an attribute is read as a key range
//!   of an index ordered by that attribute, when one covers the kind.
//! - Otherwise a kind source is read through a schema index bound to that
//!   kind (with matching recursion) whenever one exists.
//! - Kind and index sources yield ids in id order, key ranges in index order,
//!   reference sources in reference order; set operations keep first-seen
//!   order.

use crate::model::item::ItemId;
use crate::model::value::Value;
use crate::query::predicate::{CompareOp, Evaluator, Operand, Predicate};
use crate::query::QueryError;
use crate::repo::RepoResult;
use crate::schema::{KindId, Schema, SchemaError};
use crate::view::{RepositoryView, ViewError};
use log::{error, info};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// An item named directly or through a `$n` parameter holding its uuid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRef {
    Id(ItemId),
    Param(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    /// Items of `path`; with `recursive`, of its sub-kinds too.
    Kind { path: String, recursive: bool },
    /// Members of a declared index.
    Index(String),
    /// Members of `owner.attribute`.
    Refs { owner: ItemRef, attribute: String },
    /// Kind path passed as parameter `$index`.
    Param { index: usize, recursive: bool },
}

impl QuerySource {
    /// Items of `path` and all of its sub-kinds.
    pub fn every(path: impl Into<String>) -> Self {
        Self::Kind {
            path: path.into(),
            recursive: true,
        }
    }

    /// Items of exactly `path`.
    pub fn exact(path: impl Into<String>) -> Self {
        Self::Kind {
            path: path.into(),
            recursive: false,
        }
    }
}

/// One `for` clause: a source filtered by a predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub source: QuerySource,
    pub predicate: Predicate,
}

impl Query {
    pub fn new(source: QuerySource, predicate: Predicate) -> Self {
        Self { source, predicate }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    For(Query),
    Union(Vec<QueryPlan>),
    Intersect(Vec<QueryPlan>),
    Difference(Box<QueryPlan>, Box<QueryPlan>),
}

impl From<Query> for QueryPlan {
    fn from(query: Query) -> Self {
        Self::For(query)
    }
}

/// How one `for` clause reads its candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    IndexScan { index: String },
    /// Key range of an index ordered by `attribute`.
    IndexRange { index: String, attribute: String },
    KindScan { kinds: Vec<String> },
    Refs { owner: ItemId, attribute: String },
}

impl Display for AccessPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IndexScan { index } => write!(f, "index scan `{index}`"),
            Self::IndexRange { index, attribute } => {
                write!(f, "index range `{index}` on {attribute}")
            }
            Self::KindScan { kinds } => write!(f, "kind scan {}", kinds.join(", ")),
            Self::Refs { owner, attribute } => write!(f, "references {owner}.{attribute}"),
        }
    }
}

enum Access {
    Index { name: String, kind: Option<KindId> },
    /// Inclusive bounds on the ordering attribute of `name`.
    Range {
        name: String,
        attribute: String,
        kind: KindId,
        lower: Vec<Value>,
        upper: Vec<Value>,
    },
    Kinds { base: KindId, kinds: Vec<KindId> },
    Refs { owner: ItemId, attribute: String },
}

/// Runs `plan` in `view`. `$1` refers to `params[0]`.
pub fn execute(
    view: &mut RepositoryView,
    plan: &QueryPlan,
    params: &[Value],
) -> RepoResult<Vec<ItemId>> {
    let started_at = Instant::now();
    let result = run_plan(view, plan, params);
    match &result {
        Ok(ids) => info!(
            "event=query_run module=query status=ok view={} version={} results={} duration_ms={}",
            view.name(),
            view.version(),
            ids.len(),
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=query_run module=query status=error view={} duration_ms={} error={err}",
            view.name(),
            started_at.elapsed().as_millis()
        ),
    }
    result
}

/// Access paths `execute` would take, one per `for` clause in plan order.
pub fn explain(schema: &Schema, plan: &QueryPlan, params: &[Value]) -> RepoResult<Vec<AccessPath>> {
    let mut paths = Vec::new();
    collect_paths(schema, plan, params, &mut paths)?;
    Ok(paths)
}

fn collect_paths(
    schema: &Schema,
    plan: &QueryPlan,
    params: &[Value],
    paths: &mut Vec<AccessPath>,
) -> RepoResult<()> {
    match plan {
        QueryPlan::For(query) => {
            let path = match plan_source(schema, query, params)? {
                Access::Index { name, .. } => AccessPath::IndexScan { index: name },
                Access::Range {
                    name, attribute, ..
                } => AccessPath::IndexRange {
                    index: name,
                    attribute,
                },
                Access::Kinds { kinds, .. } => AccessPath::KindScan {
                    kinds: kinds
                        .iter()
                        .map(|kind| schema.kind(*kind).path().to_string())
                        .collect(),
                },
                Access::Refs { owner, attribute } => AccessPath::Refs { owner, attribute },
            };
            paths.push(path);
        }
        QueryPlan::Union(plans) | QueryPlan::Intersect(plans) => {
            for plan in plans {
                collect_paths(schema, plan, params, paths)?;
            }
        }
        QueryPlan::Difference(left, right) => {
            collect_paths(schema, left, params, paths)?;
            collect_paths(schema, right, params, paths)?;
        }
    }
    Ok(())
}

fn run_plan(
    view: &mut RepositoryView,
    plan: &QueryPlan,
    params: &[Value],
) -> RepoResult<Vec<ItemId>> {
    match plan {
        QueryPlan::For(query) => run_for(view, query, params),
        QueryPlan::Union(plans) => {
            let mut seen = HashSet::new();
            let mut ids = Vec::new();
            for plan in plans {
                for id in run_plan(view, plan, params)? {
                    if seen.insert(id) {
                        ids.push(id);
                    }
                }
            }
            Ok(ids)
        }
        QueryPlan::Intersect(plans) => {
            let mut plans = plans.iter();
            let Some(first) = plans.next() else {
                return Ok(Vec::new());
            };
            let mut ids = dedup(run_plan(view, first, params)?);
            for plan in plans {
                let other: HashSet<ItemId> = run_plan(view, plan, params)?.into_iter().collect();
                ids.retain(|id| other.contains(id));
            }
            Ok(ids)
        }
        QueryPlan::Difference(left, right) => {
            let mut ids = dedup(run_plan(view, left, params)?);
            let removed: HashSet<ItemId> = run_plan(view, right, params)?.into_iter().collect();
            ids.retain(|id| !removed.contains(id));
            Ok(ids)
        }
    }
}

fn run_for(view: &mut RepositoryView, query: &Query, params: &[Value]) -> RepoResult<Vec<ItemId>> {
    let schema = Arc::clone(view.schema());
    let access = plan_source(&schema, query, params)?;

    let scope = match &access {
        Access::Index { kind, .. } => *kind,
        Access::Range { kind, .. } => Some(*kind),
        Access::Kinds { base, .. } => Some(*base),
        Access::Refs { owner, attribute } => {
            let owner_kind = schema.kind(view.item(*owner)?.kind());
            let def = owner_kind.get_attr_def(attribute)?;
            if !def.is_reference() {
                return Err(SchemaError::NotAReference {
                    kind: owner_kind.path().to_string(),
                    attribute: attribute.clone(),
                }
                .into());
            }
            def.target_kind
                .as_deref()
                .map(|path| schema.kind_id(path))
                .transpose()?
        }
    };
    if let Some(kind) = scope {
        query.predicate.validate_for(schema.kind(kind))?;
    }
    let evaluator = Evaluator::prepare(&query.predicate, params)?;

    let candidates = match &access {
        Access::Index { name, .. } => view.index_members(name)?,
        Access::Range {
            name, lower, upper, ..
        } => view.index_range(name, lower, upper)?,
        Access::Kinds { kinds, .. } => view.kind_scan(kinds)?,
        Access::Refs { owner, attribute } => view.refs(*owner, attribute)?,
    };

    let mut ids = Vec::new();
    for id in candidates {
        let Some(item) = view.get_item(id)? else {
            continue;
        };
        if evaluator.matches(&query.predicate, item, schema.kind(item.kind())) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn plan_source(schema: &Schema, query: &Query, params: &[Value]) -> RepoResult<Access> {
    match &query.source {
        QuerySource::Kind { path, recursive } => {
            plan_kind(schema, path, *recursive, &query.predicate, params)
        }
        QuerySource::Param { index, recursive } => {
            let path = param(params, *index)?.as_str().ok_or_else(|| {
                QueryError::InvalidParameter {
                    index: *index,
                    message: "expected a kind path string".to_string(),
                }
            })?;
            plan_kind(schema, path, *recursive, &query.predicate, params)
        }
        QuerySource::Index(name) => {
            let index = schema
                .index(name)
                .ok_or_else(|| ViewError::UnknownIndex(name.clone()))?;
            Ok(Access::Index {
                name: name.clone(),
                kind: index.kind_id(),
            })
        }
        QuerySource::Refs { owner, attribute } => {
            let owner = match owner {
                ItemRef::Id(id) => *id,
                ItemRef::Param(index) => match param(params, *index)? {
                    Value::Uuid(id) => *id,
                    _ => {
                        return Err(QueryError::InvalidParameter {
                            index: *index,
                            message: "expected an item uuid".to_string(),
                        }
                        .into())
                    }
                },
            };
            Ok(Access::Refs {
                owner,
                attribute: attribute.clone(),
            })
        }
    }
}

fn plan_kind(
    schema: &Schema,
    path: &str,
    recursive: bool,
    predicate: &Predicate,
    params: &[Value],
) -> RepoResult<Access> {
    let kind = schema.kind_id(path)?;
    let bounds = attribute_bounds(predicate, params);
    for index in schema.attribute_indexes_covering(kind, recursive) {
        let Some(attribute) = index.attribute.as_deref() else {
            continue;
        };
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        for (name, op, value) in &bounds {
            if name != attribute {
                continue;
            }
            match op {
                CompareOp::Eq => {
                    lower.push(value.clone());
                    upper.push(value.clone());
                }
                CompareOp::Gt | CompareOp::Ge => lower.push(value.clone()),
                CompareOp::Lt | CompareOp::Le => upper.push(value.clone()),
                CompareOp::Ne => {}
            }
        }
        if !lower.is_empty() || !upper.is_empty() {
            return Ok(Access::Range {
                name: index.name.clone(),
                attribute: attribute.to_string(),
                kind,
                lower,
                upper,
            });
        }
    }
    if let Some(index) = schema.index_covering(kind, recursive) {
        return Ok(Access::Index {
            name: index.name.clone(),
            kind: Some(kind),
        });
    }
    Ok(Access::Kinds {
        base: kind,
        kinds: schema.kinds_covered_by(kind, recursive),
    })
}

/// `attr op value` comparisons every match must satisfy: the predicate
/// itself or the members of a top-level `and`. Bounds are inclusive, so
/// the evaluator still applies strict comparisons.
fn attribute_bounds(predicate: &Predicate, params: &[Value]) -> Vec<(String, CompareOp, Value)> {
    let clauses: Vec<&Predicate> = match predicate {
        Predicate::And(all) => all.iter().collect(),
        other => vec![other],
    };
    clauses
        .into_iter()
        .filter_map(|clause| match clause {
            Predicate::Compare { op, left, right } => match (left, right) {
                (Operand::Attr(name), other) => {
                    bound_value(other, params).map(|value| (name.clone(), *op, value))
                }
                (other, Operand::Attr(name)) => {
                    bound_value(other, params).map(|value| (name.clone(), op.flipped(), value))
                }
                _ => None,
            },
            _ => None,
        })
        .filter(|(_, op, _)| *op != CompareOp::Ne)
        .collect()
}

fn bound_value(operand: &Operand, params: &[Value]) -> Option<Value> {
    match operand {
        Operand::Literal(value) => Some(value.clone()),
        Operand::Param(index) => index
            .checked_sub(1)
            .and_then(|position| params.get(position))
            .cloned(),
        _ => None,
    }
}

fn param(params: &[Value], index: usize) -> Result<&Value, QueryError> {
    if index == 0 {
        return Err(QueryError::InvalidParameter {
            index,
            message: "parameters are numbered from $1".to_string(),
        });
    }
    params
        .get(index - 1)
        .ok_or(QueryError::UnboundParameter(index))
}

fn dedup(ids: Vec<ItemId>) -> Vec<ItemId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
