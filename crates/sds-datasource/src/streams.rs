//! Stream listing for the query editor's stream picker.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use grafana_plugin_sdk::{
    arrow::array::{Array, StringArray},
    data::Frame,
};
use serde::Serialize;
use tracing::debug;

use crate::{datasource::DataSourceAdapter, query::Target};

/// One entry of the stream picker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SelectableOption {
    /// The stream id, or the stream's `Self` link in community mode.
    pub value: String,
    /// The stream name.
    pub label: String,
}

/// Convert the frames of a stream search into picker options.
///
/// Only the first frame is read. Its `Id` and `Name` fields are zipped
/// index-wise; if either is missing, or their lengths differ, there are no
/// options.
pub fn options_from_frames(frames: &[Frame]) -> Vec<SelectableOption> {
    let Some(frame) = frames.first() else {
        return Vec::new();
    };
    let (Some(ids), Some(names)) = (string_column(frame, "Id"), string_column(frame, "Name"))
    else {
        return Vec::new();
    };
    if ids.len() != names.len() {
        return Vec::new();
    }
    ids.into_iter()
        .zip(names)
        .map(|(value, label)| SelectableOption { value, label })
        .collect()
}

// Cells that are not strings become empty strings.
fn string_column(frame: &Frame, name: &str) -> Option<Vec<String>> {
    let values = frame.fields().iter().find(|f| f.name == name)?.values();
    Some(match values.as_any().downcast_ref::<StringArray>() {
        Some(strings) => strings
            .iter()
            .map(|s| s.unwrap_or_default().to_string())
            .collect(),
        None => vec![String::new(); values.len()],
    })
}

/// A shared slot holding the most recently listed options.
///
/// The picker shows these as its default options until the user types.
#[derive(Clone, Debug, Default)]
pub struct OptionsSlot(Arc<Mutex<Option<Vec<SelectableOption>>>>);

impl OptionsSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, options: Vec<SelectableOption>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(options);
    }

    /// The stored options, or `None` if nothing was listed yet.
    pub fn get(&self) -> Option<Vec<SelectableOption>> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Lists streams through a [`DataSourceAdapter`].
#[derive(Debug)]
pub struct StreamLister<'a, A> {
    adapter: &'a A,
    headers: &'a HashMap<String, String>,
}

impl<'a, A> StreamLister<'a, A>
where
    A: DataSourceAdapter,
{
    /// `headers` are forwarded to the adapter for OAuth pass-through.
    pub fn new(adapter: &'a A, headers: &'a HashMap<String, String>) -> Self {
        Self { adapter, headers }
    }

    /// Search for streams matching `text`.
    ///
    /// The options are stored in `state` before being returned.
    pub async fn get_streams(
        &self,
        text: &str,
        state: &OptionsSlot,
    ) -> Result<Vec<SelectableOption>, A::Error> {
        let frames = self
            .adapter
            .run_query(vec![Target::autocomplete(text)], self.headers)
            .await
            .into_iter()
            .map(|response| response.result)
            .collect::<Result<Vec<_>, _>>()?;
        let options = options_from_frames(&frames);
        debug!(text, options = options.len(), "Listed streams");
        state.set(options.clone());
        Ok(options)
    }
}
