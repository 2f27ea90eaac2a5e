//! Grouped aggregation.
//!
//! An [`Aggregator`] folds tuples into per-group running state: the integer
//! aggregator keeps min, max, sum and count per group key, while the string
//! aggregator only counts. [`Aggregate`] drains its child into one of them
//! on `open` and then replays the finished groups in key order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bedrock::tuple::TdItem;
use bedrock::{DbError, DbResult, Field, Tuple, TupleDesc, Type};
use log::debug;

use crate::executor::{not_open, Executor, TupleIterator};

/// Group-by field value meaning "aggregate the whole input as one group".
pub const NO_GROUPING: Option<usize> = None;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl fmt::Display for AggOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggOp::Min => "min",
            AggOp::Max => "max",
            AggOp::Sum => "sum",
            AggOp::Avg => "avg",
            AggOp::Count => "count",
        };
        write!(f, "{}", name)
    }
}

/// Accumulates tuples into groups and reports one result row per group.
pub trait Aggregator {
    fn merge_tuple_into_group(&mut self, t: &Tuple) -> DbResult<()>;

    /// `(aggregate)` or `(group, aggregate)` rows in ascending group order.
    /// No rows if nothing was merged.
    fn iterator(&self) -> DbResult<TupleIterator>;
}

fn result_desc(group_type: Option<Type>) -> DbResult<Arc<TupleDesc>> {
    let types: Vec<Type> = group_type.into_iter().chain([Type::Int]).collect();
    Ok(Arc::new(TupleDesc::anonymous(&types)?))
}

fn group_key(
    t: &Tuple,
    group_field: Option<usize>,
    group_type: Option<Type>,
) -> DbResult<Option<Field>> {
    let Some(gfield) = group_field else {
        return Ok(None);
    };
    let key = t.field(gfield)?;
    if Some(key.field_type()) != group_type {
        return Err(DbError::SchemaMismatch(format!(
            "group field {} is {}, expected {:?}",
            gfield,
            key.field_type(),
            group_type
        )));
    }
    Ok(Some(key.clone()))
}

fn to_int(v: i64, what: &str) -> DbResult<i32> {
    i32::try_from(v).map_err(|_| DbError::Db(format!("{} {} does not fit an INT", what, v)))
}

fn result_rows<S>(
    groups: &BTreeMap<Option<Field>, S>,
    desc: &Arc<TupleDesc>,
    value: impl Fn(&S) -> DbResult<i32>,
) -> DbResult<TupleIterator> {
    let rows = groups
        .iter()
        .map(|(key, state)| {
            let mut fields: Vec<Field> = key.iter().cloned().collect();
            fields.push(Field::Int(value(state)?));
            Tuple::new(desc.clone(), fields)
        })
        .collect::<DbResult<Vec<_>>>()?;
    TupleIterator::new(desc.clone(), rows)
}

#[derive(Debug, Clone, Copy)]
struct IntState {
    min: i32,
    max: i32,
    sum: i64,
    count: i64,
}

/// Aggregates an INT column with any [`AggOp`].
pub struct IntegerAggregator {
    group_field: Option<usize>,
    group_type: Option<Type>,
    agg_field: usize,
    op: AggOp,
    groups: BTreeMap<Option<Field>, IntState>,
    desc: Arc<TupleDesc>,
}

impl IntegerAggregator {
    pub fn new(
        group_field: Option<usize>,
        group_type: Option<Type>,
        agg_field: usize,
        op: AggOp,
    ) -> DbResult<Self> {
        let group_type = group_field.and(group_type);
        if group_field.is_some() && group_type.is_none() {
            return Err(DbError::UnsupportedOp(
                "grouping needs a group field type".to_string(),
            ));
        }
        Ok(Self {
            group_field,
            group_type,
            agg_field,
            op,
            groups: BTreeMap::new(),
            desc: result_desc(group_type)?,
        })
    }
}

impl Aggregator for IntegerAggregator {
    fn merge_tuple_into_group(&mut self, t: &Tuple) -> DbResult<()> {
        let key = group_key(t, self.group_field, self.group_type)?;
        let value = t.field(self.agg_field)?.as_int().ok_or_else(|| {
            DbError::SchemaMismatch(format!("aggregate field {} is not INT", self.agg_field))
        })?;
        self.groups
            .entry(key)
            .and_modify(|s| {
                s.min = s.min.min(value);
                s.max = s.max.max(value);
                s.sum += value as i64;
                s.count += 1;
            })
            .or_insert(IntState {
                min: value,
                max: value,
                sum: value as i64,
                count: 1,
            });
        Ok(())
    }

    fn iterator(&self) -> DbResult<TupleIterator> {
        let op = self.op;
        result_rows(&self.groups, &self.desc, |s| match op {
            AggOp::Min => Ok(s.min),
            AggOp::Max => Ok(s.max),
            AggOp::Sum => to_int(s.sum, "sum"),
            // integer division truncates toward zero
            AggOp::Avg => to_int(s.sum / s.count, "average"),
            AggOp::Count => to_int(s.count, "count"),
        })
    }
}

/// Aggregates a STRING column; only COUNT is supported.
pub struct StringAggregator {
    group_field: Option<usize>,
    group_type: Option<Type>,
    agg_field: usize,
    groups: BTreeMap<Option<Field>, i64>,
    desc: Arc<TupleDesc>,
}

impl StringAggregator {
    /// Fails with `UnsupportedOp` for anything but [`AggOp::Count`].
    pub fn new(
        group_field: Option<usize>,
        group_type: Option<Type>,
        agg_field: usize,
        op: AggOp,
    ) -> DbResult<Self> {
        if op != AggOp::Count {
            return Err(DbError::UnsupportedOp(format!(
                "{} over a STRING column",
                op
            )));
        }
        let group_type = group_field.and(group_type);
        if group_field.is_some() && group_type.is_none() {
            return Err(DbError::UnsupportedOp(
                "grouping needs a group field type".to_string(),
            ));
        }
        Ok(Self {
            group_field,
            group_type,
            agg_field,
            groups: BTreeMap::new(),
            desc: result_desc(group_type)?,
        })
    }
}

impl Aggregator for StringAggregator {
    fn merge_tuple_into_group(&mut self, t: &Tuple) -> DbResult<()> {
        let key = group_key(t, self.group_field, self.group_type)?;
        if t.field(self.agg_field)?.as_str().is_none() {
            return Err(DbError::SchemaMismatch(format!(
                "aggregate field {} is not STRING",
                self.agg_field
            )));
        }
        *self.groups.entry(key).or_insert(0) += 1;
        Ok(())
    }

    fn iterator(&self) -> DbResult<TupleIterator> {
        result_rows(&self.groups, &self.desc, |count| to_int(*count, "count"))
    }
}

/// Computes one aggregate over its child, optionally grouped by one column.
///
/// The whole child is consumed on [`Executor::open`]. Output columns are
/// the group column (named as in the child) followed by an INT column named
/// `"<op> (<child column name>)"`.
pub struct Aggregate {
    child: Box<dyn Executor>,
    agg_field: usize,
    group_field: Option<usize>,
    op: AggOp,
    desc: Arc<TupleDesc>,
    results: Option<TupleIterator>,
}

impl Aggregate {
    pub fn new(
        child: Box<dyn Executor>,
        agg_field: usize,
        group_field: Option<usize>,
        op: AggOp,
    ) -> DbResult<Self> {
        let child_desc = child.tuple_desc();
        let agg_type = child_desc.field_type(agg_field)?;
        if agg_type == Type::String && op != AggOp::Count {
            return Err(DbError::UnsupportedOp(format!(
                "{} over a STRING column",
                op
            )));
        }

        let mut items = Vec::with_capacity(2);
        if let Some(gfield) = group_field {
            items.push(TdItem {
                field_type: child_desc.field_type(gfield)?,
                field_name: child_desc.field_name(gfield)?.map(str::to_string),
            });
        }
        let agg_name = child_desc.field_name(agg_field)?.unwrap_or("null");
        items.push(TdItem {
            field_type: Type::Int,
            field_name: Some(format!("{} ({})", op, agg_name)),
        });
        let desc = Arc::new(TupleDesc::from_items(items)?);

        Ok(Self {
            child,
            agg_field,
            group_field,
            op,
            desc,
            results: None,
        })
    }

    pub fn group_field(&self) -> Option<usize> {
        self.group_field
    }

    pub fn aggregate_field(&self) -> usize {
        self.agg_field
    }

    pub fn aggregate_op(&self) -> AggOp {
        self.op
    }

    /// Name of the group column, or `None` without grouping.
    pub fn group_field_name(&self) -> Option<&str> {
        self.group_field.and_then(|_| {
            self.desc
                .field_name(0)
                .ok()
                .flatten()
        })
    }

    pub fn aggregate_field_name(&self) -> Option<&str> {
        self.desc.field_name(self.desc.num_fields() - 1).ok().flatten()
    }

    fn build_aggregator(&self) -> DbResult<Box<dyn Aggregator>> {
        let child_desc = self.child.tuple_desc();
        let group_type = self
            .group_field
            .map(|g| child_desc.field_type(g))
            .transpose()?;
        Ok(match child_desc.field_type(self.agg_field)? {
            Type::Int => Box::new(IntegerAggregator::new(
                self.group_field,
                group_type,
                self.agg_field,
                self.op,
            )?),
            Type::String => Box::new(StringAggregator::new(
                self.group_field,
                group_type,
                self.agg_field,
                self.op,
            )?),
        })
    }
}

impl Executor for Aggregate {
    fn open(&mut self) -> DbResult<()> {
        let mut aggregator = self.build_aggregator()?;
        self.child.open()?;
        let mut merged = 0usize;
        while let Some(t) = self.child.next()? {
            aggregator.merge_tuple_into_group(&t)?;
            merged += 1;
        }
        let mut results = aggregator.iterator()?;
        results.open()?;
        debug!(
            "[Aggregate::open] {} over {} rows into {} groups",
            self.op,
            merged,
            results.len()
        );
        self.results = Some(results);
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        let results = self.results.as_mut().ok_or_else(|| not_open("Aggregate"))?;
        match results.next()? {
            Some(row) => Ok(Some(Tuple::new(self.desc.clone(), row.into_fields())?)),
            None => Ok(None),
        }
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.results
            .as_mut()
            .ok_or_else(|| not_open("Aggregate"))?
            .rewind()
    }

    fn close(&mut self) {
        self.child.close();
        self.results = None;
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
