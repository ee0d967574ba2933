//! Authenticated retrieval of the forum's latest posts.

use std::{collections::HashSet, sync::Arc};

use crate::{
    domain::Post,
    errors::Error,
    ports::{FetchError, ForumClient},
    session::ForumSession,
    Result,
};

pub struct PostFetcher {
    session: Arc<ForumSession>,
    forum: Arc<dyn ForumClient>,
    limit: usize,
}

impl PostFetcher {
    pub fn new(session: Arc<ForumSession>, forum: Arc<dyn ForumClient>, limit: usize) -> Self {
        Self {
            session,
            forum,
            limit,
        }
    }

    /// Fetch the most recent posts, newest first, deduplicated by id within
    /// the response.
    ///
    /// If the forum rejects the session mid-fetch, the session is marked
    /// expired and the fetch retried exactly once after a fresh login.
    pub async fn latest_posts(&self) -> Result<Vec<Post>> {
        self.session.ensure_authenticated().await?;

        match self.forum.fetch_latest(self.limit).await {
            Ok(posts) => Ok(dedup_by_id(posts)),
            Err(FetchError::Auth) => {
                tracing::warn!("fetch rejected as unauthenticated, re-logging in once");
                self.session.mark_expired().await;
                self.session.ensure_authenticated().await?;
                match self.forum.fetch_latest(self.limit).await {
                    Ok(posts) => Ok(dedup_by_id(posts)),
                    Err(e) => Err(Error::Fetch(format!("fetch failed after re-login: {e}"))),
                }
            }
            Err(e) => Err(Error::Fetch(e.to_string())),
        }
    }
}

/// Keep the first occurrence of each id, preserving the newest-first order.
fn dedup_by_id(posts: Vec<Post>) -> Vec<Post> {
    let mut seen = HashSet::new();
    posts
        .into_iter()
        .filter(|p| seen.insert(p.id))
        .collect()
}
