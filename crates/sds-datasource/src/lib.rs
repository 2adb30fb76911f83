/*! A Grafana datasource backend for the Sequential Data Store.

The datasource reads streams from either of the two SDS flavours:

- AVEVA Data Hub (ADH), the cloud service, authenticated with OAuth client
  credentials or by forwarding the signed-in user's token,
- Edge Data Store (EDS), reached directly on a local port without
  authentication.

Queries either search for streams or fetch the values of one stream over the
dashboard's time range; both come back as Grafana [`Frame`][grafana_plugin_sdk::data::Frame]s.
The query editor's stream picker is served by the `/streams` resource.

The modules are layered bottom-up:

- [`settings`] and [`query`] describe what Grafana sends,
- [`sds`] and [`client`] speak the SDS REST API,
- [`shape`] turns SDS responses into frames,
- [`backend`] unifies both flavours,
- [`datasource`] implements the plugin services on top.
*/
pub mod backend;
pub mod client;
pub mod datasource;
pub mod debounce;
pub mod error;
pub mod query;
pub mod sds;
pub mod settings;
pub mod shape;
pub mod streams;

pub use datasource::{DataSourceAdapter, SdsAdapter, SdsDataSource};
pub use error::ClientError;
