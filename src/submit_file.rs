//! Submit descriptor generation from the site template.

/// Values substituted into the template.
#[derive(Debug, Clone)]
pub struct SubmitContext {
    pub job_name: String,
    pub job_file_name: String,
    pub initial_dir: String,
    pub log_dir: String,
    pub container: String,
    pub container_wrapper: String,
    pub proxy_path: String,
    pub start: u64,
    pub count: u64,
}

/// Render `template` with every recognised setting replaced. Lines that match
/// no setting are copied through with trailing whitespace removed.
pub fn render(template: &str, ctx: &SubmitContext) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    for line in template.lines() {
        for rendered in render_line(line.trim_end(), ctx) {
            out.push_str(&rendered);
            out.push('\n');
        }
    }
    out
}

fn render_line(line: &str, ctx: &SubmitContext) -> Vec<String> {
    if line.starts_with("Requirements = ") {
        vec![
            "Requirements = (HAS_SINGULARITY == TRUE) && (HAS_CVMFS_oasis_opensciencegrid_org == True)"
                .to_string(),
        ]
    } else if line.starts_with("+SingularityImage = ") {
        vec![
            format!("+SingularityImage = \"{}\"", ctx.container),
            "+SingularityBindCVMFS = True".to_string(),
            "+SingularityAutoLoad = True".to_string(),
        ]
    } else if line.starts_with("+SingularityBindCVMFS = ")
        || line.starts_with("+SingularityAutoLoad = ")
    {
        Vec::new()
    } else if line.starts_with("transfer_input_files = ") {
        vec![format!("transfer_input_files = {}", ctx.job_file_name)]
    } else if line.starts_with("x509userproxy = ") {
        vec![format!("x509userproxy = {}", ctx.proxy_path)]
    } else if line.starts_with("initialdir = ") {
        vec![format!("initialdir = {}", ctx.initial_dir)]
    } else if line.starts_with("output = ") {
        vec![format!("output = {}/$(CLUSTER).$(PROCESS).out", ctx.log_dir)]
    } else if line.starts_with("error = ") {
        vec![format!("error = {}/$(CLUSTER).$(PROCESS).err", ctx.log_dir)]
    } else if line.starts_with("log = ") {
        vec![format!("log = {}/{}.log", ctx.log_dir, ctx.job_name)]
    } else if line.starts_with("executable =") {
        vec![format!("executable = {}", ctx.container_wrapper)]
    } else if line.starts_with("arguments = ") {
        vec![format!(
            "arguments = ./{} doslice {} $(PROCESS)",
            ctx.job_file_name, ctx.start
        )]
    } else if line.starts_with("queue") {
        vec![format!("queue {}", ctx.count)]
    } else {
        vec![line.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "\
universe = vanilla
Requirements = (OpSysAndVer == \"CentOS7\")
+SingularityImage = \"/cvmfs/some/old/image\"
+SingularityBindCVMFS = False
+SingularityAutoLoad = False
executable = run.sh
arguments = none
transfer_input_files = none
x509userproxy = /tmp/none
initialdir = /tmp
output = out.txt
error = err.txt
log = log.txt
should_transfer_files = YES
queue 1
";

    fn context() -> SubmitContext {
        SubmitContext {
            job_name: "bggen".to_string(),
            job_file_name: "bggen.toml".to_string(),
            initial_dir: "/home/user/work".to_string(),
            log_dir: "bggen.logs".to_string(),
            container: "/cvmfs/singularity.opensciencegrid.org/rjones30/gluex:latest".to_string(),
            container_wrapper: "osg-container.sh".to_string(),
            proxy_path: "/tmp/x509up_u1000".to_string(),
            start: 20,
            count: 15,
        }
    }

    #[test]
    fn test_render_substitutes_settings() {
        let rendered = render(TEMPLATE, &context());
        let expected = "\
universe = vanilla
Requirements = (HAS_SINGULARITY == TRUE) && (HAS_CVMFS_oasis_opensciencegrid_org == True)
+SingularityImage = \"/cvmfs/singularity.opensciencegrid.org/rjones30/gluex:latest\"
+SingularityBindCVMFS = True
+SingularityAutoLoad = True
executable = osg-container.sh
arguments = ./bggen.toml doslice 20 $(PROCESS)
transfer_input_files = bggen.toml
x509userproxy = /tmp/x509up_u1000
initialdir = /home/user/work
output = bggen.logs/$(CLUSTER).$(PROCESS).out
error = bggen.logs/$(CLUSTER).$(PROCESS).err
log = bggen.logs/bggen.log
should_transfer_files = YES
queue 15
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_unknown_lines_pass_through() {
        let rendered = render("# comment\nrequest_memory = 2GB\n\n", &context());
        assert_eq!(rendered, "# comment\nrequest_memory = 2GB\n\n");
    }

    #[test]
    fn test_prefix_match_requires_exact_key() {
        // "outputs = " must not be taken for "output = "
        let rendered = render("outputs = x\n", &context());
        assert_eq!(rendered, "outputs = x\n");
    }

    #[test]
    fn test_render_demo_template() {
        let rendered = render(include_str!("../demos/osg-condor.sub"), &context());
        assert!(rendered.contains("request_memory = 2GB\n"));
        assert!(rendered.contains("transfer_input_files = bggen.toml\n"));
        assert_eq!(rendered.matches("+SingularityBindCVMFS = True").count(), 1);
        assert!(rendered.ends_with("queue 15\n"));
    }

    #[test]
    fn test_singularity_lines_not_duplicated() {
        let template = "+SingularityBindCVMFS = False\n+SingularityImage = \"x\"\n+SingularityAutoLoad = False\n";
        let rendered = render(template, &context());
        assert_eq!(
            rendered.lines().collect::<Vec<_>>(),
            [
                "+SingularityImage = \"/cvmfs/singularity.opensciencegrid.org/rjones30/gluex:latest\"",
                "+SingularityBindCVMFS = True",
                "+SingularityAutoLoad = True",
            ]
        );
    }
}
