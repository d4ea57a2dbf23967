// src/core/navigation.rs
use super::model::FunctionId;

/// Jump list over visited functions: a back stack, the current entry and a
/// forward stack.
#[derive(Debug, Clone, Default)]
pub struct NavigationHistory {
    back: Vec<FunctionId>,
    current: Option<FunctionId>,
    forward: Vec<FunctionId>,
}

impl NavigationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move focus to `id`. Forward history is discarded.
    pub fn visit(&mut self, id: FunctionId) {
        if let Some(previous) = self.current.take() {
            self.back.push(previous);
        }
        self.current = Some(id);
        self.forward.clear();
    }

    pub fn back(&mut self) -> Option<FunctionId> {
        let target = self.back.pop()?;
        if let Some(current) = self.current.replace(target) {
            self.forward.push(current);
        }
        self.current.clone()
    }

    pub fn forward(&mut self) -> Option<FunctionId> {
        let target = self.forward.pop()?;
        if let Some(current) = self.current.replace(target) {
            self.back.push(current);
        }
        self.current.clone()
    }

    pub fn current(&self) -> Option<&FunctionId> {
        self.current.as_ref()
    }

    pub fn can_go_back(&self) -> bool {
        !self.back.is_empty()
    }

    pub fn can_go_forward(&self) -> bool {
        !self.forward.is_empty()
    }

    /// Number of entries including the current one
    pub fn len(&self) -> usize {
        self.back.len() + self.forward.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    pub fn clear(&mut self) {
        self.back.clear();
        self.current = None;
        self.forward.clear();
    }
}
