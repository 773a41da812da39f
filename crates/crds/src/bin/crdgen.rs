//! Prints the `NetBoxIP` CustomResourceDefinition as YAML, for
//! `kubectl apply -f -` or checking into a manifests directory.

use crds::NetBoxIP;
use kube::CustomResourceExt;

fn main() {
    let crd = NetBoxIP::crd();
    match serde_yaml::to_string(&crd) {
        Ok(yaml) => print!("{yaml}"),
        Err(err) => {
            eprintln!("failed to render CRD as YAML: {err}");
            std::process::exit(1);
        }
    }
}
