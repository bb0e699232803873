use crate::models::{
    Article, Enclosure, FeedSource, MAX_CATEGORIES, MAX_SUMMARY_LEN, PLACEHOLDER_IMAGE,
};
use crate::text::{collapse_ws, sniff_img_src, strip_html, truncate_at_boundary};
use chrono::{DateTime, NaiveDateTime, Utc};
use itertools::Itertools;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, escape};
use std::borrow::Cow;
use tracing::{debug, error, info, instrument};

/// Raw per-item field buffers as read off the wire, before fallback chains.
#[derive(Debug, Default)]
struct RawItem {
    title: String,
    link: String,
    guid: String,
    description: String,
    content_encoded: String,
    pub_date: String,
    updated: String,
    creator: String,
    categories: Vec<String>,
    enclosure: Option<(String, String)>,
    media_content: Option<String>,
    media_thumbnail: Option<String>,
}

/// Parse one feed document into ordered Articles.
///
/// Handles RSS 2.0 `<item>` and Atom `<entry>` shapes in a single event pass.
/// A parse error mid-stream ends the walk but keeps every item completed
/// before it; malformed feeds degrade to fewer articles, never to a fault.
#[instrument(level = "info", skip_all, fields(source = %source.source_name))]
pub fn parse_feed(xml: &str, source: &FeedSource) -> Vec<Article> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut buf = Vec::<u8>::new();
    let mut stack = Vec::<Vec<u8>>::new();
    let mut feed_title = String::new();
    let mut feed_link = String::new();
    let mut item: Option<RawItem> = None;
    let mut raw_items = Vec::<RawItem>::new();
    let mut skipped = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_ascii_lowercase();
                if is_item_container(&name) {
                    item = Some(RawItem::default());
                } else if let Some(it) = item.as_mut() {
                    // media elements occasionally come as start/end pairs
                    capture_media_element(it, &name, &e);
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = e.name().as_ref().to_ascii_lowercase();
                match item.as_mut() {
                    Some(it) => {
                        capture_media_element(it, &name, &e);
                        // Atom-style <link href="..."/> inside an entry
                        if name == b"link" && it.link.is_empty() {
                            if let Some(href) = attr_value(&e, b"href") {
                                it.link = href;
                            }
                        }
                    }
                    None => {
                        if name == b"link" && feed_link.is_empty() {
                            if let Some(href) = attr_value(&e, b"href") {
                                feed_link = href;
                            }
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name().as_ref().to_ascii_lowercase();
                if is_item_container(&name) {
                    if let Some(raw) = item.take() {
                        raw_items.push(raw);
                    }
                }
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                let raw = std::str::from_utf8(t.as_ref()).unwrap_or_default();
                let unescaped: Cow<'_, str> = escape::unescape(raw).unwrap_or(Cow::Borrowed(raw));
                route_text(
                    &stack,
                    &mut item,
                    &mut feed_title,
                    &mut feed_link,
                    &unescaped,
                );
            }
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                route_text(&stack, &mut item, &mut feed_title, &mut feed_link, &text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                error!(
                    error = %e,
                    offset = reader.buffer_position(),
                    parsed = raw_items.len(),
                    "XML parse error; keeping items parsed so far"
                );
                break;
            }
        }
        buf.clear();
    }

    let articles: Vec<Article> = raw_items
        .into_iter()
        .filter_map(|raw| {
            let article = normalize_item(raw, source, &feed_title, &feed_link);
            if article.is_none() {
                skipped += 1;
            }
            article
        })
        .collect();

    info!(
        count = articles.len(),
        skipped, "Normalized feed items into articles"
    );
    articles
}

fn is_item_container(name: &[u8]) -> bool {
    name == b"item" || name == b"entry"
}

/// Record enclosure / media:content / media:thumbnail attributes on the item.
fn capture_media_element(it: &mut RawItem, name: &[u8], e: &BytesStart<'_>) {
    match name {
        b"enclosure" => {
            if it.enclosure.is_none() {
                let url = attr_value(e, b"url").unwrap_or_default();
                let mime = attr_value(e, b"type").unwrap_or_default();
                if !url.is_empty() {
                    it.enclosure = Some((url, mime));
                }
            }
        }
        b"media:content" => {
            if it.media_content.is_none() {
                it.media_content = attr_value(e, b"url").filter(|u| !u.is_empty());
            }
        }
        b"media:thumbnail" => {
            if it.media_thumbnail.is_none() {
                it.media_thumbnail = attr_value(e, b"url").filter(|u| !u.is_empty());
            }
        }
        _ => {}
    }
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Append a text/CDATA chunk to whichever buffer the current element owns.
fn route_text(
    stack: &[Vec<u8>],
    item: &mut Option<RawItem>,
    feed_title: &mut String,
    feed_link: &mut String,
    text: &str,
) {
    let Some(current) = stack.last() else {
        return;
    };
    let parent = stack.len().checked_sub(2).map(|i| stack[i].as_slice());

    match item.as_mut() {
        Some(it) => match current.as_slice() {
            b"title" => it.title.push_str(text),
            b"link" => it.link.push_str(text),
            b"guid" | b"id" => it.guid.push_str(text),
            b"description" | b"summary" => it.description.push_str(text),
            b"content:encoded" | b"content" => it.content_encoded.push_str(text),
            b"pubdate" => it.pub_date.push_str(text),
            b"updated" | b"published" | b"dc:date" => it.updated.push_str(text),
            b"dc:creator" | b"author" => it.creator.push_str(text),
            b"name" if parent == Some(b"author".as_slice()) => it.creator.push_str(text),
            b"category" => it.categories.push(text.trim().to_string()),
            _ => {}
        },
        None => {
            // channel-level fallback context; guard against <image><title>
            let under_channel = matches!(parent, Some(b"channel") | Some(b"feed"));
            match current.as_slice() {
                b"title" if under_channel && feed_title.is_empty() => feed_title.push_str(text),
                b"link" if under_channel && feed_link.is_empty() => feed_link.push_str(text),
                _ => {}
            }
        }
    }
}

/// Apply the per-field fallback chains to one raw item.
///
/// Returns `None` only for titleless items, which are a data-quality skip
/// rather than an error.
fn normalize_item(
    raw: RawItem,
    source: &FeedSource,
    feed_title: &str,
    feed_link: &str,
) -> Option<Article> {
    let title = collapse_ws(&raw.title);
    if title.is_empty() {
        debug!(guid = %raw.guid, "Skipping item without a title");
        return None;
    }

    let item_link = raw.link.trim().to_string();
    let link = if !item_link.is_empty() {
        item_link.clone()
    } else if !feed_link.trim().is_empty() {
        feed_link.trim().to_string()
    } else {
        "#".to_string()
    };

    // identity: guid, else the item's own link, else the title
    let guid = raw.guid.trim();
    let id = if !guid.is_empty() {
        guid.to_string()
    } else if !item_link.is_empty() {
        item_link
    } else {
        title.clone()
    };

    let description = truncate_at_boundary(&strip_html(&raw.description), MAX_SUMMARY_LEN);
    let content_html = if raw.content_encoded.trim().is_empty() {
        raw.description.clone()
    } else {
        raw.content_encoded
    };

    // explicit media tags win over markup sniffing; the placeholder closes
    // the chain so `image` is never empty
    let (enclosure_image, enclosure) = match raw.enclosure {
        Some((url, mime)) if mime.starts_with("image/") => (Some(url), None),
        Some((url, mime)) => (
            None,
            Some(Enclosure {
                url,
                mime_type: mime,
            }),
        ),
        None => (None, None),
    };
    let image = raw
        .media_content
        .or(enclosure_image)
        .or(raw.media_thumbnail)
        .or_else(|| sniff_img_src(&raw.description))
        .or_else(|| sniff_img_src(&content_html))
        .unwrap_or_else(|| PLACEHOLDER_IMAGE.to_string());

    let pub_date = parse_date(&raw.pub_date).or_else(|| parse_date(&raw.updated));

    let creator = collapse_ws(&raw.creator);
    let author = if !creator.is_empty() {
        creator
    } else if !feed_title.trim().is_empty() {
        feed_title.trim().to_string()
    } else {
        source.source_name.clone()
    };

    let categories: Vec<String> = raw
        .categories
        .into_iter()
        .filter(|c| !c.is_empty())
        .unique()
        .take(MAX_CATEGORIES)
        .collect();

    Some(Article {
        id,
        title,
        link,
        description,
        raw_description: raw.description,
        content_html,
        image,
        enclosure,
        pub_date,
        author,
        categories,
        source_name: source.source_name.clone(),
        feed_title: feed_title.trim().to_string(),
        feed_link: feed_link.trim().to_string(),
    })
}

/// Parse a feed timestamp, trying the formats seen in the wild.
///
/// An unparsable or missing date stays `None`; substituting "now" would put
/// undated items at the front of the recency sort instead of the back.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(s)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok())
        .or_else(|| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z").ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GENERAL_BUCKET;

    fn src() -> FeedSource {
        FeedSource::new("https://example.com/feed.rss", "Example Times")
    }

    fn wrap_items(items: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel>
<title>Example Times Bengaluru</title>
<link>https://example.com</link>
{items}
</channel>
</rss>"#
        )
    }

    #[test]
    fn test_full_item_all_fields() {
        let xml = wrap_items(
            r#"<item>
<title>Metro line opens</title>
<link>https://example.com/metro</link>
<guid isPermaLink="false">metro-123</guid>
<description><![CDATA[<p>The <b>purple line</b> extension opened today.</p>]]></description>
<content:encoded><![CDATA[<p>The purple line extension opened today with <img src="https://cdn.example.com/inline.jpg"> much fanfare.</p>]]></content:encoded>
<pubDate>Mon, 04 Aug 2025 09:30:00 +0530</pubDate>
<dc:creator>City Desk</dc:creator>
<category>Transport</category>
<category>Metro</category>
<media:content url="https://cdn.example.com/metro.jpg" medium="image"/>
</item>"#,
        );

        let articles = parse_feed(&xml, &src());
        assert_eq!(articles.len(), 1);
        let a = &articles[0];
        assert_eq!(a.id, "metro-123");
        assert_eq!(a.title, "Metro line opens");
        assert_eq!(a.link, "https://example.com/metro");
        assert_eq!(a.description, "The purple line extension opened today.");
        assert!(a.raw_description.contains("<b>purple line</b>"));
        assert!(a.content_html.contains("much fanfare"));
        // explicit media:content beats the inline <img>
        assert_eq!(a.image, "https://cdn.example.com/metro.jpg");
        assert_eq!(a.author, "City Desk");
        assert_eq!(a.categories, vec!["Transport", "Metro"]);
        assert_eq!(a.source_name, "Example Times");
        assert_eq!(a.feed_title, "Example Times Bengaluru");
        assert_eq!(a.feed_link, "https://example.com");
        assert!(a.pub_date.is_some());
    }

    #[test]
    fn test_titleless_item_skipped() {
        let xml = wrap_items(
            r#"<item><description>no title here</description></item>
<item><title>Kept</title></item>"#,
        );
        let articles = parse_feed(&xml, &src());
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Kept");
    }

    #[test]
    fn test_id_fallback_link_then_title() {
        let xml = wrap_items(
            r#"<item><title>Has link</title><link>https://example.com/x</link></item>
<item><title>Only title</title></item>"#,
        );
        let articles = parse_feed(&xml, &src());
        assert_eq!(articles[0].id, "https://example.com/x");
        assert_eq!(articles[1].id, "Only title");
    }

    #[test]
    fn test_link_falls_back_to_channel_then_hash() {
        let xml = wrap_items(r#"<item><title>Linkless</title></item>"#);
        let articles = parse_feed(&xml, &src());
        assert_eq!(articles[0].link, "https://example.com");

        let bare = r#"<rss><channel><item><title>Bare</title></item></channel></rss>"#;
        let articles = parse_feed(bare, &src());
        assert_eq!(articles[0].link, "#");
    }

    #[test]
    fn test_image_from_image_enclosure() {
        let xml = wrap_items(
            r#"<item><title>T</title>
<enclosure url="https://cdn.example.com/pic.jpg" type="image/jpeg" length="1000"/>
</item>"#,
        );
        let a = &parse_feed(&xml, &src())[0];
        assert_eq!(a.image, "https://cdn.example.com/pic.jpg");
        assert!(a.enclosure.is_none());
    }

    #[test]
    fn test_non_image_enclosure_kept_separately() {
        let xml = wrap_items(
            r#"<item><title>T</title>
<enclosure url="https://cdn.example.com/pod.mp3" type="audio/mpeg"/>
<media:thumbnail url="https://cdn.example.com/thumb.jpg"/>
</item>"#,
        );
        let a = &parse_feed(&xml, &src())[0];
        assert_eq!(a.image, "https://cdn.example.com/thumb.jpg");
        assert_eq!(
            a.enclosure,
            Some(Enclosure {
                url: "https://cdn.example.com/pod.mp3".to_string(),
                mime_type: "audio/mpeg".to_string(),
            })
        );
    }

    #[test]
    fn test_image_sniffed_from_description_markup() {
        let xml = wrap_items(
            r#"<item><title>T</title>
<description><![CDATA[Look: <img src="https://cdn.example.com/sniffed.png"/>]]></description>
</item>"#,
        );
        let a = &parse_feed(&xml, &src())[0];
        assert_eq!(a.image, "https://cdn.example.com/sniffed.png");
    }

    #[test]
    fn test_image_placeholder_when_nothing_matches() {
        let xml = wrap_items(
            r#"<item><title>T</title>
<description><![CDATA[<p>Traffic diversion near <b>MG Road</b> today</p>]]></description>
</item>"#,
        );
        let a = &parse_feed(&xml, &src())[0];
        assert_eq!(a.description, "Traffic diversion near MG Road today");
        assert_eq!(a.image, PLACEHOLDER_IMAGE);
    }

    #[test]
    fn test_categories_deduped_case_sensitive_capped() {
        let xml = wrap_items(
            r#"<item><title>T</title>
<category>Civic</category>
<category>civic</category>
<category>Civic</category>
<category>Water</category>
<category>Roads</category>
<category>Power</category>
<category>Waste</category>
</item>"#,
        );
        let a = &parse_feed(&xml, &src())[0];
        assert_eq!(a.categories, vec!["Civic", "civic", "Water", "Roads"]);
    }

    #[test]
    fn test_updated_used_when_pubdate_absent() {
        let xml = wrap_items(
            r#"<item><title>T</title><updated>2025-08-03T10:00:00Z</updated></item>"#,
        );
        let a = &parse_feed(&xml, &src())[0];
        assert_eq!(
            a.pub_date,
            Some(
                DateTime::parse_from_rfc3339("2025-08-03T10:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc)
            )
        );
    }

    #[test]
    fn test_garbage_date_stays_unknown() {
        let xml = wrap_items(r#"<item><title>T</title><pubDate>yesterday-ish</pubDate></item>"#);
        let a = &parse_feed(&xml, &src())[0];
        assert!(a.pub_date.is_none());
    }

    #[test]
    fn test_author_chain() {
        let xml = wrap_items(
            r#"<item><title>With creator</title><dc:creator>Jane Desk</dc:creator></item>
<item><title>Without creator</title></item>"#,
        );
        let articles = parse_feed(&xml, &src());
        assert_eq!(articles[0].author, "Jane Desk");
        assert_eq!(articles[1].author, "Example Times Bengaluru");

        let bare = r#"<rss><channel><item><title>T</title></item></channel></rss>"#;
        let articles = parse_feed(bare, &src());
        assert_eq!(articles[0].author, "Example Times");
    }

    #[test]
    fn test_description_truncated_to_limit() {
        let long = "bengaluru traffic ".repeat(40);
        let xml = wrap_items(&format!(
            "<item><title>T</title><description>{long}</description></item>"
        ));
        let a = &parse_feed(&xml, &src())[0];
        assert!(a.description.chars().count() <= MAX_SUMMARY_LEN);
        assert!(a.description.ends_with('…'));
        assert_eq!(collapse_ws(&a.raw_description), collapse_ws(&long));
    }

    #[test]
    fn test_atom_entry_shape() {
        let xml = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
<title>Atom City</title>
<link href="https://atom.example.com"/>
<entry>
<title>Atom story</title>
<id>urn:uuid:abc</id>
<link href="https://atom.example.com/story"/>
<summary>Short take</summary>
<updated>2025-08-02T08:00:00Z</updated>
<author><name>A. Writer</name></author>
</entry>
</feed>"#;
        let articles = parse_feed(xml, &src());
        assert_eq!(articles.len(), 1);
        let a = &articles[0];
        assert_eq!(a.id, "urn:uuid:abc");
        assert_eq!(a.link, "https://atom.example.com/story");
        assert_eq!(a.description, "Short take");
        assert_eq!(a.author, "A. Writer");
        assert_eq!(a.feed_link, "https://atom.example.com");
        assert!(a.pub_date.is_some());
    }

    #[test]
    fn test_malformed_xml_keeps_earlier_items() {
        let xml = r#"<rss><channel>
<title>Broken</title>
<item><title>First</title></item>
<item><title>Second</title></item>
<item><title>Dangling</title>
</channel>"#;
        let articles = parse_feed(xml, &src());
        assert_eq!(articles.len(), 2);
    }

    #[test]
    fn test_empty_document_yields_no_articles() {
        assert!(parse_feed("", &src()).is_empty());
        assert!(parse_feed("not xml at all", &src()).is_empty());
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("Mon, 04 Aug 2025 09:30:00 +0530").is_some());
        assert!(parse_date("2025-08-04T09:30:00+05:30").is_some());
        assert!(parse_date("2025-08-04 09:30:00").is_some());
        assert!(parse_date("").is_none());
        assert!(parse_date("soon").is_none());
    }

    #[test]
    fn test_general_bucket_constant_is_not_a_category() {
        // uncategorized items stay uncategorized; bucketing adds the sentinel
        let xml = wrap_items(r#"<item><title>T</title></item>"#);
        let a = &parse_feed(&xml, &src())[0];
        assert!(a.categories.is_empty());
        assert_ne!(a.categories.first().map(String::as_str), Some(GENERAL_BUCKET));
    }
}
