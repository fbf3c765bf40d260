//! Bounded FIFO queue of in-flight downloads.
//!
//! Every queued future makes progress whenever the queue is awaited, but
//! results come back strictly in admission order. Once `limit` downloads
//! are queued, admitting another first waits for the oldest one.

use std::future::Future;

use futures_util::stream::{FuturesOrdered, StreamExt};

pub struct DownloadQueue<F: Future> {
    in_flight: FuturesOrdered<F>,
    limit: usize,
}

impl<F: Future> DownloadQueue<F> {
    /// Queue allowing up to `limit` concurrent downloads (at least one).
    pub fn new(limit: usize) -> Self {
        Self {
            in_flight: FuturesOrdered::new(),
            limit: limit.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Admit a download. If the queue is full, first wait for the oldest
    /// download and return its result.
    pub async fn push(&mut self, download: F) -> Option<F::Output> {
        let oldest = if self.in_flight.len() >= self.limit {
            self.in_flight.next().await
        } else {
            None
        };
        self.in_flight.push_back(download);
        oldest
    }

    /// Wait for every queued download, oldest first.
    pub async fn drain(&mut self) -> Vec<F::Output> {
        let mut done = Vec::with_capacity(self.in_flight.len());
        while let Some(output) = self.in_flight.next().await {
            done.push(output);
        }
        done
    }
}
