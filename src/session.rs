//! Session context
//!
//! Everything that lives between login and logout: the panel client (and
//! with it the credentials), the categories, the channels of the selected
//! category and the EPG index.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::api::PanelClient;
use crate::epg::{DisplayZone, EpgCache, EpgIndex, Program};
use crate::error::{ViewerError, ViewerResult};
use crate::models::{filter_channels, Category, Channel, Credentials};
use crate::transport::{Gateway, Transport};

pub struct Session {
    client: PanelClient,
    categories: Vec<Category>,
    selected: Option<Category>,
    channels: Vec<Channel>,
    epg: EpgCache,
    epg_failure: Option<ViewerError>,
    zone: DisplayZone,
}

impl Session {
    /// Check the credentials against the panel and load the category list.
    pub fn login(
        credentials: Credentials,
        gateway: Gateway,
        transport: Arc<dyn Transport>,
        zone: DisplayZone,
    ) -> ViewerResult<Self> {
        if !credentials.is_complete() {
            return Err(ViewerError::MissingCredentials);
        }

        let client = PanelClient::new(credentials, gateway, transport);
        let categories = client.authenticate()?;
        info!(
            "logged in as {} on {} ({} categories)",
            client.credentials().username,
            client.credentials().server_url,
            categories.len()
        );

        Ok(Self {
            client,
            categories,
            selected: None,
            channels: Vec::new(),
            epg: EpgCache::new(),
            epg_failure: None,
            zone,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        self.client.credentials()
    }

    pub fn zone(&self) -> DisplayZone {
        self.zone
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn selected_category(&self) -> Option<&Category> {
        self.selected.as_ref()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Category by id, or by name ignoring case.
    pub fn find_category(&self, key: &str) -> Option<&Category> {
        let key = key.trim();
        self.categories
            .iter()
            .find(|c| c.id == key)
            .or_else(|| {
                let lowered = key.to_lowercase();
                self.categories.iter().find(|c| c.name.to_lowercase() == lowered)
            })
    }

    /// Fetch the channels of one category. They replace whatever was loaded
    /// before; on failure the list is left empty.
    pub fn select_category(&mut self, category_id: &str) -> ViewerResult<&[Channel]> {
        self.channels.clear();
        let category = self
            .categories
            .iter()
            .find(|c| c.id == category_id)
            .cloned()
            .unwrap_or_else(|| Category {
                id: category_id.to_string(),
                name: category_id.to_string(),
            });
        self.selected = Some(category);

        self.channels = self.client.live_streams(category_id)?;
        Ok(&self.channels)
    }

    /// Select the first category, if there is one.
    pub fn select_first(&mut self) -> ViewerResult<&[Channel]> {
        match self.categories.first().map(|c| c.id.clone()) {
            Some(id) => self.select_category(&id),
            None => Ok(&self.channels),
        }
    }

    pub fn search(&self, term: &str) -> Vec<&Channel> {
        filter_channels(&self.channels, term)
    }

    pub fn find_channel(&self, stream_id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.stream_id == stream_id)
    }

    /// Reload the EPG. A failure only degrades the guide: browsing continues
    /// and schedule lookups report the failure until the next rebuild.
    pub fn rebuild_epg(&mut self) -> ViewerResult<()> {
        let result = self
            .epg
            .rebuild(&self.client)
            .inspect_err(|e| warn!("EPG unavailable for this session: {}", e));
        self.epg_failure = result.clone().err();
        result
    }

    pub fn epg(&self) -> &EpgIndex {
        self.epg.index()
    }

    pub fn schedule(
        &self,
        epg_channel_id: Option<&str>,
        date: Option<NaiveDate>,
    ) -> ViewerResult<Vec<&Program>> {
        let epg_channel_id = epg_channel_id.filter(|id| !id.is_empty());
        if epg_channel_id.is_none() {
            return Err(ViewerError::EpgChannelUnknown);
        }
        if let Some(ref failure) = self.epg_failure {
            return Err(failure.clone());
        }
        self.epg.query(epg_channel_id, date, self.zone)
    }

    pub fn stream_url(&self, stream_id: &str) -> String {
        self.client.stream_url(stream_id)
    }

    /// End the session; credentials and caches go with it.
    pub fn logout(self) {
        info!("logged out {}", self.client.credentials().username);
    }
}
