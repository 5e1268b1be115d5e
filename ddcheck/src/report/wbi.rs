//! WBI request signing for Bilibili web APIs.

use md5::{Digest, Md5};

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
}

impl WbiKeys {
    /// Keys are the file stems of the `wbi_img` URLs returned by `/nav`.
    pub fn from_urls(img_url: &str, sub_url: &str) -> Option<Self> {
        Some(Self {
            img_key: file_stem(img_url)?,
            sub_key: file_stem(sub_url)?,
        })
    }

    fn mixin_key(&self) -> String {
        let orig = format!("{}{}", self.img_key, self.sub_key);
        let bytes = orig.as_bytes();
        MIXIN_KEY_ENC_TAB
            .iter()
            .take(32)
            .filter_map(|&i| bytes.get(i).map(|&b| b as char))
            .collect()
    }
}

fn file_stem(url: &str) -> Option<String> {
    url.rsplit_once('/')
        .and_then(|(_, s)| s.rsplit_once('.'))
        .map(|(s, _)| s.to_string())
}

fn url_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            // Stripped from values before signing.
            '!' | '\'' | '(' | ')' | '*' => {}
            _ => {
                let mut buf = [0; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    encoded.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    encoded
}

/// Build the signed query string, `w_rid` last.
pub fn sign_query(mut params: Vec<(&str, String)>, keys: &WbiKeys, timestamp: i64) -> String {
    params.push(("wts", timestamp.to_string()));
    params.sort_by(|a, b| a.0.cmp(b.0));

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", url_encode(k), url_encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(format!("{query}{}", keys.mixin_key()));
    format!("{query}&w_rid={:x}", hasher.finalize())
}
