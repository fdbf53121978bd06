use crate::device::Section;

/// Round-robin over a device's register sections.
///
/// The cursor names the section whose reply is currently expected.
#[derive(Debug, Clone)]
pub struct SectionScheduler {
    sections: &'static [Section],
    section_index: usize,
}

impl SectionScheduler {
    pub fn new(sections: &'static [Section]) -> Self {
        assert!(!sections.is_empty(), "a device needs at least one section");
        Self { sections, section_index: 0 }
    }

    pub fn current(&self) -> &Section {
        &self.sections[self.section_index]
    }

    pub fn index(&self) -> usize {
        self.section_index
    }

    /// Move to the next section. Returns true when this wrapped back to the
    /// first one, i.e. a full sweep has completed.
    pub fn advance(&mut self) -> bool {
        self.section_index = (self.section_index + 1) % self.sections.len();
        self.section_index == 0
    }

    /// Start the next sweep from the first section.
    pub fn reset(&mut self) {
        self.section_index = 0;
    }
}
