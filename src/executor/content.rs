//! Mock campaign content builder
//!
//! Produces channel-appropriate publish payloads from a small template
//! bank. Copy quality is out of scope; the payloads only need to pass
//! boundary validation and look plausible in demos.

use rand::seq::SliceRandom;

use crate::models::{Campaign, Channel};
use crate::publish::ChannelContent;

/// Build publish content for one execution of a campaign
pub fn build(campaign: &Campaign) -> ChannelContent {
    let mut rng = rand::thread_rng();
    let product = campaign.name.as_str();
    let slug = slugify(product);

    match campaign.channel {
        Channel::Facebook => {
            let messages = [
                format!("Meet {product} — now available.\n\nLimited launch pricing this week."),
                format!("{product} is here. See what everyone is switching to."),
                format!("New drop: {product}.\n\nTap to learn more."),
            ];
            let ctas = ["SHOP_NOW", "LEARN_MORE", "SIGN_UP"];

            ChannelContent::Facebook {
                message: pick(&mut rng, &messages),
                link: format!("https://example.com/{slug}"),
                call_to_action: pick_str(&mut rng, &ctas),
                image_url: format!("https://cdn.example.com/assets/{slug}.png"),
            }
        }
        Channel::Email => {
            let subjects = [
                format!("Your {product} offer is inside"),
                format!("Don't miss {product} this week"),
                format!("{product}: early access for subscribers"),
            ];
            let subject = pick(&mut rng, &subjects);

            ChannelContent::Email {
                preview_text: format!("Save on {product} today"),
                html_body: format!(
                    "<html><body><h1>{product}</h1>\
                     <p>See why {product} is our most popular launch yet.</p>\
                     <a href=\"https://example.com/{slug}\">Shop now</a></body></html>"
                ),
                plain_body: format!(
                    "{product}\n\nSee why {product} is our most popular launch yet.\n\
                     Shop now: https://example.com/{slug}"
                ),
                subject,
            }
        }
        Channel::Search => {
            let headline_bank = [
                format!("{product} - Official Site"),
                format!("Best {product} Deals"),
                format!("Shop {product} Today"),
            ];
            let descriptions = [
                format!("Discover {product}. Free shipping on orders over $50."),
                format!("Shop {product} now. Limited time offer."),
            ];

            ChannelContent::Search {
                headlines: headline_bank
                    .iter()
                    .take(2)
                    .map(|h| truncate(h, 30))
                    .collect(),
                descriptions: descriptions.iter().take(2).map(|d| truncate(d, 90)).collect(),
                final_url: format!("https://example.com/{slug}"),
            }
        }
    }
}

fn pick(rng: &mut impl rand::Rng, options: &[String]) -> String {
    options
        .choose(rng)
        .cloned()
        .unwrap_or_else(|| options[0].clone())
}

fn pick_str(rng: &mut impl rand::Rng, options: &[&str]) -> String {
    options.choose(rng).copied().unwrap_or(options[0]).to_string()
}

/// Lowercase, hyphen-separated path fragment
fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Clip to the platform's character limit on a char boundary
fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

// ============================================================================
// Tests
// ============================================================================
