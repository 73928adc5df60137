use std::sync::{Arc, Mutex};

use crate::event::{
    command::{CommandEvent, CommandStartedEvent},
    EventHandler,
};

/// A buffer of events, filled synchronously by the handler it hands out.
#[derive(Clone, Debug)]
pub(crate) struct EventBuffer<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T> EventBuffer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            events: Default::default(),
        }
    }

    /// Returns an `EventHandler` that will append to this buffer.
    pub(crate) fn handler(&self) -> EventHandler<T> {
        let events = self.events.clone();
        EventHandler::callback(move |ev| events.lock().unwrap().push(ev))
    }

    pub(crate) fn all(&self) -> Vec<T> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn filter_map<R>(&self, f: impl Fn(&T) -> Option<R>) -> Vec<R> {
        self.events.lock().unwrap().iter().filter_map(f).collect()
    }

    pub(crate) fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventBuffer<CommandEvent> {
    /// Gets all of the command started events for the specified command names.
    pub(crate) fn get_command_started_events(&self, names: &[&str]) -> Vec<CommandStartedEvent> {
        self.filter_map(|ev| match ev {
            CommandEvent::Started(started) if names.contains(&started.command_name.as_str()) => {
                Some(started.clone())
            }
            _ => None,
        })
    }

    pub(crate) fn started_command_names(&self) -> Vec<String> {
        self.filter_map(|ev| match ev {
            CommandEvent::Started(started) => Some(started.command_name.clone()),
            _ => None,
        })
    }
}
