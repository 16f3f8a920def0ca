//! Local copy of the enrollable subjects

use parking_lot::RwLock;

use crate::api::Subject;

#[derive(Debug, Default)]
pub struct SubjectRoster {
    subjects: RwLock<Vec<Subject>>,
}

impl SubjectRoster {
    pub fn new(subjects: Vec<Subject>) -> Self {
        Self {
            subjects: RwLock::new(subjects),
        }
    }

    pub fn replace(&self, subjects: Vec<Subject>) {
        *self.subjects.write() = subjects;
    }

    pub fn list(&self) -> Vec<Subject> {
        self.subjects.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Subject> {
        self.subjects.read().iter().find(|s| s.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.subjects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.read().is_empty()
    }

    /// Subjects with no enrolled face yet
    pub fn pending(&self) -> Vec<Subject> {
        self.subjects
            .read()
            .iter()
            .filter(|s| !s.trained)
            .cloned()
            .collect()
    }

    /// Optimistically flag a subject as enrolled. Returns false when the
    /// subject is not in the roster.
    pub fn mark_trained(&self, id: &str) -> bool {
        match self.subjects.write().iter_mut().find(|s| s.id == id) {
            Some(subject) => {
                subject.trained = true;
                true
            }
            None => false,
        }
    }
}
