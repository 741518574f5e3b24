//! Optional SMT-LIB dumps of submitted trace queries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use interpath_smt::backends::smtlib_printer::query_script;

use super::*;

#[derive(Debug, Clone, Default)]
pub(crate) struct QueryDumper {
    template: Option<String>,
    counter: Arc<AtomicUsize>,
}

impl QueryDumper {
    pub(crate) fn new(template: Option<String>) -> Self {
        Self {
            template,
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Write `formulas` as a standalone script. Failures are logged and
    /// otherwise ignored.
    pub(crate) fn dump<'a>(
        &self,
        formulas: impl IntoIterator<Item = &'a SmtTerm>,
    ) -> Option<PathBuf> {
        let template = self.template.as_deref()?;
        let index = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = dump_path(template, index);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %path.display(), error = %e, "could not create dump directory");
                return None;
            }
        }
        match std::fs::write(&path, query_script(formulas)) {
            Ok(()) => {
                debug!(path = %path.display(), "trace query dumped");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not write trace query dump");
                None
            }
        }
    }
}

pub(crate) fn dump_path(template: &str, index: usize) -> PathBuf {
    let counter = format!("{index:04}");
    if template.contains("%d") {
        PathBuf::from(template.replace("%d", &counter))
    } else {
        PathBuf::from(format!("{template}.{counter}"))
    }
}
