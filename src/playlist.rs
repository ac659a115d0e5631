//! Playlist resolution
//!
//! Turns a playlist URL into a [`PlaylistDescriptor`]. Master playlists are
//! resolved to one media playlist: variants are tried from the highest
//! bandwidth down and the first one that loads wins. Relative segment and key
//! URIs are made absolute against the media playlist's URL.

use crate::config::{HttpConfig, LimitsConfig};
use crate::error::{Error, Result};
use crate::http::fetch_bytes;
use crate::types::{EncryptionKeyRef, KeyMethod, PlaylistDescriptor, SegmentRef};
use crate::utils::absolutize;
use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist, parse_playlist_res};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fetches and resolves HLS playlists
#[derive(Clone)]
pub struct PlaylistResolver {
    client: reqwest::Client,
    http: Arc<HttpConfig>,
    limits: Arc<LimitsConfig>,
}

impl PlaylistResolver {
    /// Create a resolver sharing the downloader's HTTP client
    pub fn new(client: reqwest::Client, http: Arc<HttpConfig>, limits: Arc<LimitsConfig>) -> Self {
        Self {
            client,
            http,
            limits,
        }
    }

    /// Resolve `url` (master or media) into a descriptor of its media playlist
    pub async fn resolve(&self, url: &str) -> Result<PlaylistDescriptor> {
        let (media_url, media) = match self.fetch_playlist(url).await? {
            Playlist::MediaPlaylist(media) => (url.to_string(), media),
            Playlist::MasterPlaylist(master) => self.select_variant(url, &master).await?,
        };

        let descriptor = describe_media(&media_url, &media)?;

        if descriptor.len() > self.limits.segment_warning_threshold {
            warn!(
                segments = descriptor.len(),
                threshold = self.limits.segment_warning_threshold,
                "Playlist is unusually long"
            );
        }
        info!(
            playlist_url = %descriptor.playlist_url,
            segments = descriptor.len(),
            media_sequence = descriptor.media_sequence_start,
            encrypted = descriptor.is_encrypted(),
            "Playlist resolved"
        );

        Ok(descriptor)
    }

    /// Re-fetch the media playlist and return the current URL of segment `index`
    ///
    /// Some origins sign segment URLs with a short expiry, so a URL that failed
    /// twice may simply be stale.
    pub async fn refresh_segment_url(&self, playlist_url: &str, index: usize) -> Result<String> {
        let media = match self.fetch_playlist(playlist_url).await? {
            Playlist::MediaPlaylist(media) => media,
            Playlist::MasterPlaylist(_) => {
                return Err(Error::Playlist(format!(
                    "expected a media playlist at {playlist_url}, got a master playlist"
                )));
            }
        };

        let segment = media.segments.get(index).ok_or_else(|| {
            Error::Playlist(format!(
                "segment {index} no longer listed in {playlist_url} ({} segments)",
                media.segments.len()
            ))
        })?;

        absolutize(playlist_url, &segment.uri)
            .map_err(|e| Error::Playlist(format!("bad segment URI '{}': {e}", segment.uri)))
    }

    async fn fetch_playlist(&self, url: &str) -> Result<Playlist> {
        let body = fetch_bytes(&self.client, url, self.http.playlist_timeout)
            .await
            .map_err(|e| Error::Playlist(format!("failed to fetch {url}: {e}")))?;

        parse_playlist_res(&body)
            .map_err(|e| Error::Playlist(format!("failed to parse {url}: {e}")))
    }

    async fn select_variant(
        &self,
        master_url: &str,
        master: &MasterPlaylist,
    ) -> Result<(String, MediaPlaylist)> {
        let mut variants: Vec<_> = master.variants.iter().filter(|v| !v.is_i_frame).collect();
        variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));

        if variants.is_empty() {
            return Err(Error::Playlist(format!(
                "master playlist {master_url} lists no variants"
            )));
        }
        debug!(variants = variants.len(), "Master playlist, selecting variant");

        for variant in variants {
            let variant_url = match absolutize(master_url, &variant.uri) {
                Ok(url) => url,
                Err(e) => {
                    warn!(uri = %variant.uri, error = %e, "Skipping variant with bad URI");
                    continue;
                }
            };

            match self.fetch_playlist(&variant_url).await {
                Ok(Playlist::MediaPlaylist(media)) => {
                    info!(
                        bandwidth = variant.bandwidth,
                        variant_url = %variant_url,
                        "Selected variant"
                    );
                    return Ok((variant_url, media));
                }
                Ok(Playlist::MasterPlaylist(_)) => {
                    warn!(variant_url = %variant_url, "Variant is itself a master playlist, trying next");
                }
                Err(e) => {
                    warn!(
                        bandwidth = variant.bandwidth,
                        variant_url = %variant_url,
                        error = %e,
                        "Variant failed to load, trying next"
                    );
                }
            }
        }

        Err(Error::Playlist(format!(
            "no variant of {master_url} could be loaded"
        )))
    }
}

/// Build a descriptor from a parsed media playlist fetched from `playlist_url`
///
/// `#EXT-X-KEY` applies to every following segment until the next key tag, so
/// the key in effect is carried forward. `METHOD=NONE` switches encryption off.
pub fn describe_media(playlist_url: &str, media: &MediaPlaylist) -> Result<PlaylistDescriptor> {
    if media.segments.is_empty() {
        return Err(Error::Playlist(format!(
            "media playlist {playlist_url} has no segments"
        )));
    }

    let base_url = url::Url::parse(playlist_url)
        .and_then(|u| u.join("."))
        .map_err(|e| Error::Playlist(format!("cannot derive base URL of {playlist_url}: {e}")))?
        .to_string();

    let mut current_key: Option<EncryptionKeyRef> = None;
    let mut encryption: Option<EncryptionKeyRef> = None;
    let mut segments = Vec::with_capacity(media.segments.len());

    for (index, segment) in media.segments.iter().enumerate() {
        if let Some(key) = &segment.key {
            current_key = key_ref(playlist_url, key)?;
            if encryption.is_none() {
                encryption = current_key.clone();
            }
        }

        let uri = absolutize(playlist_url, &segment.uri)
            .map_err(|e| Error::Playlist(format!("bad segment URI '{}': {e}", segment.uri)))?;

        segments.push(SegmentRef {
            index,
            uri,
            key: current_key.clone(),
        });
    }

    Ok(PlaylistDescriptor {
        playlist_url: playlist_url.to_string(),
        base_url,
        segments,
        media_sequence_start: media.media_sequence,
        encryption,
    })
}

fn key_ref(playlist_url: &str, key: &m3u8_rs::Key) -> Result<Option<EncryptionKeyRef>> {
    match &key.method {
        m3u8_rs::KeyMethod::None => Ok(None),
        m3u8_rs::KeyMethod::AES128 => {
            let uri = key.uri.as_deref().ok_or_else(|| {
                Error::Playlist("AES-128 key tag without a URI".to_string())
            })?;
            let uri = absolutize(playlist_url, uri)
                .map_err(|e| Error::Playlist(format!("bad key URI '{uri}': {e}")))?;
            Ok(Some(EncryptionKeyRef {
                uri,
                method: KeyMethod::Aes128,
                iv: key.iv.clone(),
            }))
        }
        other => Err(Error::Playlist(format!(
            "unsupported encryption method {other:?}, only AES-128 is handled"
        ))),
    }
}
