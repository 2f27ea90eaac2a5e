use std::sync::Arc;

use bedrock::tuple::TdItem;
use bedrock::{DbResult, Tuple, TupleDesc};

use super::{not_open, Executor};
use crate::predicate::Predicate;

/// Passes through the child tuples that satisfy a predicate.
pub struct Filter {
    predicate: Predicate,
    child: Box<dyn Executor>,
    opened: bool,
}

impl Filter {
    pub fn new(predicate: Predicate, child: Box<dyn Executor>) -> Self {
        Self {
            predicate,
            child,
            opened: false,
        }
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }
}

impl Executor for Filter {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.opened {
            return Err(not_open("Filter"));
        }
        while let Some(t) = self.child.next()? {
            if self.predicate.filter(&t)? {
                return Ok(Some(t));
            }
        }
        Ok(None)
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.child.rewind()
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        self.child.tuple_desc()
    }
}

/// Keeps the listed child columns, in the listed order.
pub struct Project {
    fields: Vec<usize>,
    child: Box<dyn Executor>,
    desc: Arc<TupleDesc>,
    opened: bool,
}

impl Project {
    pub fn new(fields: Vec<usize>, child: Box<dyn Executor>) -> DbResult<Self> {
        let child_desc = child.tuple_desc();
        let items = fields
            .iter()
            .map(|&i| {
                Ok(TdItem {
                    field_type: child_desc.field_type(i)?,
                    field_name: child_desc.field_name(i)?.map(str::to_string),
                })
            })
            .collect::<DbResult<Vec<_>>>()?;
        let desc = Arc::new(TupleDesc::from_items(items)?);
        Ok(Self {
            fields,
            child,
            desc,
            opened: false,
        })
    }
}

impl Executor for Project {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.opened {
            return Err(not_open("Project"));
        }
        let Some(t) = self.child.next()? else {
            return Ok(None);
        };
        let fields = self
            .fields
            .iter()
            .map(|&i| t.field(i).cloned())
            .collect::<DbResult<Vec<_>>>()?;
        let mut out = Tuple::new(self.desc.clone(), fields)?;
        out.set_record_id(t.record_id());
        Ok(Some(out))
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.child.rewind()
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
