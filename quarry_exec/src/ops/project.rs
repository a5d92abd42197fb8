use super::OpIterator;
use crate::errors::{ExecError, Result};
use granite::error::DbError;
use granite::tuple::{Tuple, TupleDesc, Type};

/// Narrows each child tuple to the listed fields, in the listed order.
pub struct Project {
    fields: Vec<usize>,
    child: Box<dyn OpIterator>,
    desc: TupleDesc,
    opened: bool,
}

impl Project {
    /// `fields` selects child field indices; `types` declares the output
    /// schema. Output field names are taken from the child where available.
    pub fn new(fields: Vec<usize>, types: Vec<Type>, child: Box<dyn OpIterator>) -> Self {
        let child_desc = child.tuple_desc();
        let names = fields
            .iter()
            .map(|&i| {
                child_desc
                    .field_name(i)
                    .ok()
                    .flatten()
                    .map(str::to_string)
            })
            .collect();
        let desc = TupleDesc::new(types, names);
        Project {
            fields,
            child,
            desc,
            opened: false,
        }
    }
}

impl OpIterator for Project {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        self.opened = true;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.opened {
            return Err(ExecError::NotOpen);
        }
        self.child.has_next()
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(ExecError::NoSuchElement);
        }
        let t = self.child.next()?;
        let mut out = Tuple::new(self.desc.clone());
        for (out_idx, &child_idx) in self.fields.iter().enumerate() {
            let f = t.field(child_idx).ok_or(DbError::FieldIndex(child_idx))?;
            out.set_field(out_idx, f.clone())?;
        }
        Ok(out)
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.opened {
            return Err(ExecError::NotOpen);
        }
        self.child.rewind()
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn set_children(&mut self, mut children: Vec<Box<dyn OpIterator>>) {
        if let Some(child) = children.pop() {
            self.child = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::TupleIterator;
    use granite::tuple::Field;

    #[test]
    fn projects_selected_fields_in_order() {
        let td = TupleDesc::new(
            vec![Type::Int, Type::Str, Type::Int],
            vec![
                Some("id".to_string()),
                Some("name".to_string()),
                Some("age".to_string()),
            ],
        );
        let rows = vec![Tuple::with_fields(
            td.clone(),
            vec![
                Field::Int(1),
                Field::Str("ada".to_string()),
                Field::Int(36),
            ],
        )];
        let child = TupleIterator::new(td, rows);
        let mut project = Project::new(
            vec![2, 1],
            vec![Type::Int, Type::Str],
            Box::new(child),
        );
        assert_eq!(project.tuple_desc().num_fields(), 2);
        assert_eq!(project.tuple_desc().field_name(0).unwrap(), Some("age"));

        project.open().unwrap();
        let t = project.next().unwrap();
        assert_eq!(t.field(0), Some(&Field::Int(36)));
        assert_eq!(t.field(1), Some(&Field::Str("ada".to_string())));
        assert!(!project.has_next().unwrap());
    }

    #[test]
    fn projecting_a_bad_index_is_an_error() {
        let td = TupleDesc::with_types(vec![Type::Int]);
        let rows = vec![Tuple::with_fields(td.clone(), vec![Field::Int(1)])];
        let child = TupleIterator::new(td, rows);
        let mut project = Project::new(vec![5], vec![Type::Int], Box::new(child));
        project.open().unwrap();
        assert!(project.next().is_err());
    }
}
