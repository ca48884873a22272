use calico::Calico;
use cilium::Cilium;
use common::{
    cni::{Cni, CniTarget},
    config::CniKind,
};

pub type Constructor = fn(CniTarget) -> Box<dyn Cni>;

fn calico(target: CniTarget) -> Box<dyn Cni> {
    Box::new(Calico::new(target))
}

fn cilium(target: CniTarget) -> Box<dyn Cni> {
    Box::new(Cilium::new(target))
}

/// Installers for plugins that replace a runtime's built-in networking.
pub const INSTALLERS: &[(CniKind, Constructor)] = &[
    (CniKind::Calico, calico as Constructor),
    (CniKind::Cilium, cilium as Constructor),
];

pub fn new_cni(kind: CniKind, target: CniTarget) -> Option<Box<dyn Cni>> {
    INSTALLERS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, new)| new(target))
}
