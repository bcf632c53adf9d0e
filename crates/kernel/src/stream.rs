// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The finite event stream handed to the caller of `run()`

use futures::Stream;
use rill_core::{Event, EventKind, PipelineEndData, RunId};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Lazy, finite sequence of events for one run.
///
/// Ends after the `FINISH` event. Dropping or closing the stream early is
/// the "client closed" signal: the kernel still runs shutdown and records a
/// `ClientClosed` terminal status, but stops forwarding events.
#[derive(Debug)]
pub struct RunStream {
    run_id: RunId,
    rx: mpsc::Receiver<Event>,
}

impl RunStream {
    pub(crate) fn new(run_id: RunId, rx: mpsc::Receiver<Event>) -> Self {
        Self { run_id, rx }
    }

    /// The run this stream belongs to.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Next event, or `None` once the run has terminated.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Stop consuming; the kernel observes this as "client closed".
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Drain the stream and return the terminal payload, if one arrived.
    pub async fn collect_end(mut self) -> Option<PipelineEndData> {
        while let Some(event) = self.next().await {
            if event.kind == EventKind::Finish {
                return serde_json::from_value(event.payload).ok();
            }
        }
        None
    }

    /// Drain the stream, collecting every event including `FINISH`.
    pub async fn collect(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for RunStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}
