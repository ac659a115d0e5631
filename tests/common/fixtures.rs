//! Playlist fixtures and a mock HLS origin

use cbc::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// AES key used by encrypted fixtures
pub const TEST_KEY: [u8; 16] = *b"hls-dl-test-key!";

/// Body of segment `index`; distinct and variable-length so ordering mistakes show
pub fn segment_body(index: usize) -> Vec<u8> {
    let mut body = format!("<segment {index:05}>").into_bytes();
    body.extend(std::iter::repeat_n(b'.', index % 7));
    body
}

/// Concatenation of segments `0..count`, i.e. the expected merged output
pub fn expected_output(count: usize) -> Vec<u8> {
    (0..count).flat_map(segment_body).collect()
}

/// Options for [`media_playlist`]
#[derive(Debug, Clone, Default)]
pub struct MediaOptions {
    /// `#EXT-X-MEDIA-SEQUENCE`, omitted when `None`
    pub media_sequence: Option<u64>,
    /// Key URI for a playlist-wide `#EXT-X-KEY:METHOD=AES-128`
    pub key_uri: Option<String>,
    /// Explicit IV attribute for the key tag
    pub iv: Option<String>,
}

/// VOD media playlist listing `seg0.ts..seg{count-1}.ts`
pub fn media_playlist(count: usize, options: &MediaOptions) -> String {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n");
    if let Some(sequence) = options.media_sequence {
        playlist.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{sequence}\n"));
    }
    if let Some(uri) = &options.key_uri {
        playlist.push_str(&format!("#EXT-X-KEY:METHOD=AES-128,URI=\"{uri}\""));
        if let Some(iv) = &options.iv {
            playlist.push_str(&format!(",IV={iv}"));
        }
        playlist.push('\n');
    }
    for i in 0..count {
        playlist.push_str(&format!("#EXTINF:6.000,\nseg{i}.ts\n"));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

/// Master playlist with one variant per `(bandwidth, uri)` pair
pub fn master_playlist(variants: &[(u64, &str)]) -> String {
    let mut playlist = String::from("#EXTM3U\n");
    for (bandwidth, uri) in variants {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={bandwidth},RESOLUTION=1280x720\n{uri}\n"
        ));
    }
    playlist
}

/// AES-128-CBC encrypt with PKCS7 padding, the way HLS packagers do
pub fn encrypt_segment(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    let mut buffer = vec![0u8; (plaintext.len() / 16 + 1) * 16];
    buffer[..plaintext.len()].copy_from_slice(plaintext);
    cbc::Encryptor::<aes::Aes128>::new(key.into(), iv.into())
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
        .expect("buffer has room for padding")
        .to_vec()
}

/// A wiremock server posing as an HLS origin
pub struct HlsOrigin {
    /// The underlying mock server
    pub server: MockServer,
}

impl HlsOrigin {
    /// Start an origin with nothing mounted
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Absolute URL of `route` on this origin
    pub fn url(&self, route: &str) -> String {
        format!("{}{route}", self.server.uri())
    }

    /// Serve `body` at `route`
    pub async fn serve(&self, route: &str, body: impl Into<Vec<u8>>) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into()))
            .mount(&self.server)
            .await;
    }

    /// Answer `route` with `status`, optionally only for the first `times` requests
    pub async fn fail(&self, route: &str, status: u16, times: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status));
        let mock = match times {
            Some(n) => mock.up_to_n_times(n).expect(n),
            None => mock,
        };
        mock.mount(&self.server).await;
    }

    /// Serve a plain media playlist at `{dir}/index.m3u8` and its segments under `dir`
    pub async fn serve_media(&self, dir: &str, count: usize) {
        self.serve(
            &format!("{dir}/index.m3u8"),
            media_playlist(count, &MediaOptions::default()),
        )
        .await;
        for i in 0..count {
            self.serve(&format!("{dir}/seg{i}.ts"), segment_body(i)).await;
        }
    }
}
