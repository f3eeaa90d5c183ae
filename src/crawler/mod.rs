//! # Crawler Module
//!
//! The coordination engine that marries the fetch stage to the parse stage.
//!
//! ## Overview
//!
//! `SiteCrawler` is the central hub and referee between the network spider
//! (the fetch stage) and the page parser (the parse stage). It owns the
//! frontier, the scope policy, the crawl counters, and a pool of configured
//! HTTP clients, and exposes the full control surface: configure, navigate,
//! pause, hard-pause, resume, reset, shut down.
//!
//! ## Architecture
//!
//! Five cooperating pieces run per crawl:
//!
//! - the coordinator loop, on the caller's task, dispatching frontier URLs
//!   to the fetch stage under backpressure;
//! - the fetch stage, a pool of download workers;
//! - the parse stage, a half-width pool of page-processing workers;
//! - two single-task completion consumers moving finished work downstream
//!   and feeding discovered links back into the frontier.
//!
//! All communication is via completion channels and the frontier queue, and
//! every wait is a five-second timed poll that re-checks the stop flag.

mod consumers;
mod core;

pub use self::core::SiteCrawler;
