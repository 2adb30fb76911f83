use sds_datasource::SdsDataSource;

#[grafana_plugin_sdk::main(
    services(data, diagnostics, resource),
    init_subscriber = true
)]
async fn plugin() -> SdsDataSource {
    SdsDataSource::default()
}
