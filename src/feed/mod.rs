mod fetcher;

pub use fetcher::CodeFeed;
