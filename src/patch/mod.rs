//! Line-oriented, idempotent source rewriting.
//!
//! A [`Transform`] rewrites a file one line at a time; [`PatchStore`] wraps
//! any transform with the backup-marker idempotency check and records the
//! outcome in a [`Ledger`].

pub mod errors;
pub mod insert;
pub mod ledger;
pub mod matcher;
pub mod replace;
pub mod store;

pub use errors::PatchError;
pub use insert::{InsertionRule, LineInserter};
pub use ledger::{Ledger, PatchOutcome, PatchTarget};
pub use matcher::{Literal, Matcher};
pub use replace::{ReplacementRule, TextReplacer};
pub use store::{PatchStore, DEFAULT_BACKUP_SUFFIX};

/// A single streaming pass over a file's lines.
pub trait Transform {
    /// Rewrite one source line (terminator included) into `out`.
    fn apply_line(&mut self, line: &str, out: &mut String);

    /// Run the transform over a whole file, preserving line order.
    fn run(&mut self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for line in input.split_inclusive('\n') {
            self.apply_line(line, &mut out);
        }
        out
    }
}

impl<T: Transform + ?Sized> Transform for &mut T {
    fn apply_line(&mut self, line: &str, out: &mut String) {
        (**self).apply_line(line, out)
    }

    fn run(&mut self, input: &str) -> String {
        (**self).run(input)
    }
}

impl<T: Transform + ?Sized> Transform for Box<T> {
    fn apply_line(&mut self, line: &str, out: &mut String) {
        (**self).apply_line(line, out)
    }

    fn run(&mut self, input: &str) -> String {
        (**self).run(input)
    }
}

/// Several transforms applied to one file in a single patch.
///
/// A file is patched at most once, so every rewrite aimed at it has to be
/// part of the same pass. Stages run in order, each over the whole output of
/// the one before it.
#[derive(Default)]
pub struct Chain {
    stages: Vec<Box<dyn Transform>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, stage: impl Transform + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push(&mut self, stage: Box<dyn Transform>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl Transform for Chain {
    fn apply_line(&mut self, line: &str, out: &mut String) {
        let mut current = line.to_string();
        for stage in &mut self.stages {
            let mut next = String::with_capacity(current.len());
            for piece in current.split_inclusive('\n') {
                stage.apply_line(piece, &mut next);
            }
            current = next;
        }
        out.push_str(&current);
    }

    fn run(&mut self, input: &str) -> String {
        self.stages
            .iter_mut()
            .fold(input.to_string(), |text, stage| stage.run(&text))
    }
}
