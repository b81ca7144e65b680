use crate::error::LoadResourceError;
use crate::resource::{LoadingInput, Resource};

/// A UTF-8 text file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextResource {
    text: String,
}

impl TextResource {
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Resource for TextResource {
    const TYPE_ID: &'static str = "text";

    fn load(input: &LoadingInput<'_>) -> Result<Self, LoadResourceError> {
        Ok(TextResource {
            text: input.resource_data_as_text()?.to_owned(),
        })
    }
}
