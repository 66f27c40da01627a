pub mod types;
pub mod config;
pub mod text;
pub mod traits;
pub mod fetcher;
pub mod parser;
pub mod aggregator;
pub mod ledger;
pub mod image;
pub mod summarizer;
pub mod gemini;
pub mod telegram;
pub mod publisher;
pub mod orchestrator;

pub use types::*;
pub use config::RelayConfig;
pub use traits::{ChannelIdentity, FeedClient, MessagingChannel, PageClient, TextGenerator};
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use aggregator::FeedAggregator;
pub use ledger::DedupLedger;
pub use image::{ImageLocator, ImageResolver, MetaTagScanner};
pub use summarizer::SummaryGenerator;
pub use gemini::GeminiClient;
pub use telegram::TelegramClient;
pub use publisher::Publisher;
pub use orchestrator::Orchestrator;
