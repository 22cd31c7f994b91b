//! Per-workflow page registration.
//!
//! Workflows are declared once at process start through an explicit
//! ordered registration call, validated as a whole, and read-only
//! afterwards. The engine owns the registry behind an `Arc`.

use crate::error::EngineError;
use crate::page::{ElementId, ElementKind, Page, Render};
use crate::respond::Visibility;
use crate::token::DELIMITER;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Type-safe workflow id wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Creates a new WorkflowId.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for WorkflowId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for WorkflowId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One registered workflow: its ordered pages and flow-wide policy.
pub struct Workflow {
    pages: Vec<Page>,
    visibility: Visibility,
    finale: Render,
    cancel: Option<(ElementId, Render)>,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("pages", &self.pages.len())
            .field("visibility", &self.visibility)
            .finish()
    }
}

impl Workflow {
    /// Creates a workflow whose renders carry `visibility`.
    pub fn new(visibility: Visibility) -> Self {
        Self {
            pages: Vec::new(),
            visibility,
            finale: Render::new("Done", "This flow is complete."),
            cancel: None,
        }
    }

    /// Appends the next page of the sequence.
    pub fn page(mut self, page: Page) -> Self {
        self.pages.push(page);
        self
    }

    /// Sets the render emitted when a handler finishes the flow.
    pub fn finale(mut self, render: Render) -> Self {
        self.finale = render;
        self
    }

    /// Declares a flow-wide cancel element: activating it on any page
    /// enters terminal, deletes session state, and emits `render`.
    pub fn cancel_on(mut self, element: impl Into<ElementId>, render: Render) -> Self {
        self.cancel = Some((element.into(), render));
        self
    }

    /// Returns the ordered pages.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Returns the flow-wide render visibility.
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub(crate) fn finale_render(&self) -> &Render {
        &self.finale
    }

    pub(crate) fn cancel_element(&self) -> Option<(&ElementId, &Render)> {
        self.cancel.as_ref().map(|(id, render)| (id, render))
    }
}

/// Read-only table of registered workflows.
pub struct Registry {
    workflows: HashMap<WorkflowId, Arc<Workflow>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("workflows", &self.workflows.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Creates a new registry builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Returns the workflow registered under `id`.
    pub fn get(&self, id: &str) -> Option<&Arc<Workflow>> {
        self.workflows.get(id)
    }

    /// Returns `true` if a workflow with the given id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.workflows.contains_key(id)
    }

    /// Returns an iterator over all registered workflow ids.
    pub fn workflow_ids(&self) -> impl Iterator<Item = &WorkflowId> {
        self.workflows.keys()
    }

    /// Returns the number of registered workflows.
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

/// Builder for constructing [`Registry`] instances.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<(WorkflowId, Workflow)>,
}

impl RegistryBuilder {
    /// Creates a new empty registry builder.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers a workflow under `id`.
    pub fn register(mut self, id: impl Into<WorkflowId>, workflow: Workflow) -> Self {
        self.entries.push((id.into(), workflow));
        self
    }

    /// Validates every registration and builds the registry.
    pub fn build(self) -> Result<Registry, EngineError> {
        let mut workflows = HashMap::new();
        for (id, workflow) in self.entries {
            validate_id(&id)?;
            validate_pages(&id, &workflow)?;
            if workflows.insert(id.clone(), Arc::new(workflow)).is_some() {
                return Err(EngineError::Configuration(format!(
                    "workflow '{}' registered twice",
                    id
                )));
            }
        }
        Ok(Registry { workflows })
    }
}

fn validate_id(id: &WorkflowId) -> Result<(), EngineError> {
    if id.as_str().is_empty() {
        return Err(EngineError::Configuration(
            "workflow id must not be empty".to_string(),
        ));
    }
    if id.as_str().contains(DELIMITER) {
        return Err(EngineError::Configuration(format!(
            "workflow id '{}' contains the token delimiter",
            id
        )));
    }
    Ok(())
}

fn validate_pages(id: &WorkflowId, workflow: &Workflow) -> Result<(), EngineError> {
    if workflow.pages().is_empty() {
        return Err(EngineError::Configuration(format!(
            "workflow '{}' has no pages",
            id
        )));
    }
    for (index, page) in workflow.pages().iter().enumerate() {
        let Some(descriptor) = page.descriptor() else {
            continue;
        };
        validate_descriptor(descriptor).map_err(|detail| {
            EngineError::Configuration(format!("workflow '{}' page {}: {}", id, index, detail))
        })?;
    }
    Ok(())
}

fn validate_descriptor(render: &Render) -> Result<(), String> {
    let mut seen: HashSet<&str> = HashSet::new();
    for element in &render.elements {
        if !seen.insert(element.id.as_str()) {
            return Err(format!("duplicate element id '{}'", element.id));
        }
        match &element.kind {
            ElementKind::SingleSelect { options } if options.is_empty() => {
                return Err(format!("select '{}' has no options", element.id));
            }
            ElementKind::MultiSelect { options, min, max } => {
                if options.is_empty() {
                    return Err(format!("select '{}' has no options", element.id));
                }
                if min > max || *max > options.len() {
                    return Err(format!(
                        "select '{}' bounds {}..={} do not fit {} options",
                        element.id,
                        min,
                        max,
                        options.len()
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
