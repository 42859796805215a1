use crate::config::InjectionConfig;

pub(crate) struct ApiServerState {
    pub(crate) injection_config: InjectionConfig,
}
