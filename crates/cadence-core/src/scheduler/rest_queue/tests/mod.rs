use super::*;
use crate::config::{BackoffConfig, BudgetConfig};
use crate::model::Credentials;
use crate::upstream::mock::{
    credentials, event, GatedStore, MockFetcher, MockStore, RecordingNotifier,
};

mod common;
use common::*;

mod wait_time;
